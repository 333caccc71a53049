use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use komet_core::util::target_path_from_arg;
use komet_core::{preferences, text, BreadcrumbStore, Preferences};

const USAGE: &str = "\
usage: komet-breadcrumbs <command> [<file>]

commands:
  show <file>      print the resumable breadcrumbs for <file>, or why there are none
  path <file>      print where breadcrumbs for <file> are stored
  clear <file>     discard the breadcrumbs for <file>
  analyze <file>   print the commit text analysis of <file>
  schema           print the JSON schema of the preferences file";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Show(PathBuf),
    Path(PathBuf),
    Clear(PathBuf),
    Analyze(PathBuf),
    Schema,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    match args {
        [cmd] if cmd == "schema" => Ok(Command::Schema),
        [cmd, file] => {
            let target = target_path_from_arg(file);
            match cmd.as_str() {
                "show" => Ok(Command::Show(target)),
                "path" => Ok(Command::Path(target)),
                "clear" => Ok(Command::Clear(target)),
                "analyze" => Ok(Command::Analyze(target)),
                other => Err(format!("unknown command: {}", other)),
            }
        }
        [] => Err("missing command".to_string()),
        _ => Err("wrong number of arguments".to_string()),
    }
}

fn run(
    command: &Command,
    store: &BreadcrumbStore,
    prefs: &Preferences,
    out: &mut impl Write,
) -> Result<(), String> {
    let write_err = |e: std::io::Error| format!("Failed to write output: {}", e);
    match command {
        Command::Show(target) => match store.try_load(target) {
            Ok(file) => {
                let json = serde_json::json!({
                    "target": file.target().to_string_lossy(),
                    "location": file.location().to_string_lossy(),
                    "record": file.record(),
                });
                let pretty = serde_json::to_string_pretty(&json)
                    .map_err(|e| format!("Failed to serialize breadcrumbs: {}", e))?;
                writeln!(out, "{}", pretty).map_err(write_err)
            }
            Err(e) if e.is_absent() => writeln!(out, "{}", e).map_err(write_err),
            Err(e) => Err(e.to_string()),
        },
        Command::Path(target) => {
            writeln!(out, "{}", store.path_for(target).display()).map_err(write_err)
        }
        Command::Clear(target) => {
            store.discard(target).map_err(|e| e.to_string())?;
            log::info!("Cleared breadcrumbs for {:?}", target);
            Ok(())
        }
        Command::Analyze(target) => {
            let contents = std::fs::read_to_string(target)
                .map_err(|e| format!("Failed to read {:?}: {}", target, e))?;
            let report = text::analyze(target, &contents, prefs);
            let pretty = serde_json::to_string_pretty(&report)
                .map_err(|e| format!("Failed to serialize analysis: {}", e))?;
            writeln!(out, "{}", pretty).map_err(write_err)
        }
        Command::Schema => {
            let pretty = serde_json::to_string_pretty(&preferences::schema())
                .map_err(|e| format!("Failed to serialize schema: {}", e))?;
            writeln!(out, "{}", pretty).map_err(write_err)
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("komet-breadcrumbs: {}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    let prefs = preferences::load();
    let Some(store) = BreadcrumbStore::from_preferences(&prefs) else {
        eprintln!("komet-breadcrumbs: cannot determine a data directory for breadcrumbs");
        return ExitCode::FAILURE;
    };

    let stdout = std::io::stdout();
    match run(&command, &store, &prefs, &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("komet-breadcrumbs: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use komet_core::{ResumePolicy, TextRange};
    use std::time::Duration;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn setup() -> (tempfile::TempDir, BreadcrumbStore, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("COMMIT_EDITMSG");
        std::fs::write(&target, "Subject\n\n# Please enter the commit message\n").unwrap();
        let store = BreadcrumbStore::new(
            dir.path().join("crumbs"),
            ResumePolicy::new(true, Duration::from_secs(300)),
        );
        (dir, store, target)
    }

    fn run_to_string(command: &Command, store: &BreadcrumbStore) -> Result<String, String> {
        let mut out = Vec::new();
        run(command, store, &Preferences::default(), &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            parse_args(&args(&["show", "/tmp/COMMIT_EDITMSG"])),
            Ok(Command::Show(PathBuf::from("/tmp/COMMIT_EDITMSG")))
        );
        assert_eq!(
            parse_args(&args(&["clear", "file:///tmp/COMMIT_EDITMSG"])),
            Ok(Command::Clear(PathBuf::from("/tmp/COMMIT_EDITMSG")))
        );
        assert_eq!(parse_args(&args(&["schema"])), Ok(Command::Schema));
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args(&["show"])).is_err());
        assert!(parse_args(&args(&["frobnicate", "x"])).is_err());
        assert!(parse_args(&args(&["show", "a", "b"])).is_err());
    }

    #[test]
    fn show_then_clear() {
        let (_dir, store, target) = setup();
        let mut file = store.create(&target);
        file.exit_status = 1;
        file.comment_line_ranges = vec![TextRange::new(9, 34)];
        store.save(&file).unwrap();

        let shown = run_to_string(&Command::Show(target.clone()), &store).unwrap();
        let json: serde_json::Value = serde_json::from_str(&shown).unwrap();
        assert_eq!(json["record"]["exit_status"], 1);
        assert_eq!(json["record"]["comment_line_ranges"][0]["length"], 34);

        run_to_string(&Command::Clear(target.clone()), &store).unwrap();
        assert!(!store.path_for(&target).exists());

        let shown = run_to_string(&Command::Show(target), &store).unwrap();
        assert!(shown.starts_with("no breadcrumbs stored at"));
    }

    #[test]
    fn show_reports_corruption_as_error() {
        let (_dir, store, target) = setup();
        let location = store.path_for(&target);
        std::fs::create_dir_all(location.parent().unwrap()).unwrap();
        std::fs::write(&location, "{").unwrap();
        let err = run_to_string(&Command::Show(target), &store).unwrap_err();
        assert!(err.starts_with("malformed breadcrumbs"));
        assert!(location.exists(), "show must not delete what it inspects");
    }

    #[test]
    fn path_prints_storage_location() {
        let (_dir, store, target) = setup();
        let printed = run_to_string(&Command::Path(target.clone()), &store).unwrap();
        assert_eq!(printed.trim_end(), store.path_for(&target).display().to_string());
    }

    #[test]
    fn analyze_prints_report() {
        let (_dir, store, target) = setup();
        let printed = run_to_string(&Command::Analyze(target), &store).unwrap();
        let json: serde_json::Value = serde_json::from_str(&printed).unwrap();
        assert_eq!(json["commit_text"]["length"], 7);
        assert_eq!(json["squash"], false);
    }

    #[test]
    fn schema_is_json() {
        let (_dir, store, _target) = setup();
        let printed = run_to_string(&Command::Schema, &store).unwrap();
        let json: serde_json::Value = serde_json::from_str(&printed).unwrap();
        assert!(json["properties"]["resume_incomplete_session"].is_object());
    }
}
