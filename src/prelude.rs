pub use crate::address::GroupAddress;
pub use crate::channels::Channels;
pub use crate::level::Level;
pub use crate::options::Options;
pub use crate::settings::{Settings, SettingsWrapper};

pub use crate::{file_error, file_error_with_source, file_error_with_source_no_fmt};

pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write as _;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;
