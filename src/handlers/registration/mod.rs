pub mod dialogue;
pub mod poller;
pub mod registry;

pub use dialogue::{DialogueState, RegistrationDialogue};
pub use poller::RegistrationPoller;
pub use registry::{AddressBook, AddressRegistry, BindOutcome, RegistryError, UserId};
