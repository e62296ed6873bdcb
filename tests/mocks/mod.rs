pub mod mock_formatter;
pub mod mock_listener;
pub mod mock_strategy;

pub use mock_formatter::{CapturingFormatter, SharedBuffer};
pub use mock_listener::TimerListener;
pub use mock_strategy::{CallLog, RecordingDelegate};
