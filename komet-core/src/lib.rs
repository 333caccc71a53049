pub mod breadcrumbs;
pub mod error;
pub mod incomplete;
pub mod preferences;
pub mod session;
pub mod store;
pub mod text;
pub mod util;

pub use breadcrumbs::{Breadcrumbs, TextRange};
pub use error::BreadcrumbsError;
pub use preferences::{Preferences, ResumePolicy};
pub use session::EditSession;
pub use store::{BreadcrumbStore, BreadcrumbsFile};
