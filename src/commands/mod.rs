mod play;
mod record;
mod show;
mod types;
mod upload;

pub use play::Play;
pub use record::{parse_viewport, Record};
pub use show::Show;
pub use upload::Upload;
