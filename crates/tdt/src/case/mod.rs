pub mod identity;
pub mod layout;
pub mod model;
pub mod scanner;

pub use identity::CaseIdentity;
pub use layout::CaseLayout;
pub use model::{Case, CaseState, CtInputKind};
pub use scanner::CaseScanner;
