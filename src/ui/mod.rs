//! Ratatui front end: setlists, setlist detail and the song catalog.

mod app;
mod forms;
mod helpers;
mod terminal;

pub use app::App;
pub use terminal::run_app;
