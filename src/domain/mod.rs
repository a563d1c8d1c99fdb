pub mod accounts;
pub mod personas;
pub mod twitter;

pub use accounts::{Account, AccountStatus, Branding};
pub use personas::{Persona, PersonaCatalog};
