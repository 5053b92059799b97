pub mod bubbles;
pub mod profile;
pub mod reading;
pub mod typing;

pub use bubbles::{split_bubbles, MAX_BUBBLES};
pub use profile::TypingProfile;
pub use reading::reading_time;
pub use typing::{simulate_typing, typing_schedule};
