pub use crate::app::{describe_event, ImageDetails, WallarooCliApp};

mod app;
