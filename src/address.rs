use crate::prelude::*;

use std::fmt;

/// A C-Bus group address, `network/application/group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupAddress {
    pub network: u8,
    pub application: u8,
    pub group: u8,
}

impl GroupAddress {
    pub fn new(network: u8, application: u8, group: u8) -> Self {
        Self {
            network,
            application,
            group,
        }
    }
}

impl FromStr for GroupAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            bail!("address.rs:address {:?} does not have exactly three segments", s);
        }

        Ok(Self {
            network: parts[0].parse()?,
            application: parts[1].parse()?,
            group: parts[2].parse()?,
        })
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.network, self.application, self.group)
    }
}
