//! Host nodes volumes are published to

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// iSCSI initiator name, empty when the node has none
    #[serde(default)]
    pub iqn: String,
    #[serde(default)]
    pub ips: Vec<String>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            iqn: String::new(),
            ips: Vec::new(),
        }
    }

    pub fn with_iqn(mut self, iqn: impl Into<String>) -> Self {
        self.iqn = iqn.into();
        self
    }

    pub fn with_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ips = ips.into_iter().map(Into::into).collect();
        self
    }
}
