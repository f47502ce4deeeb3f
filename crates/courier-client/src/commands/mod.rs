pub mod directory;
pub mod linking;
pub mod messaging;
