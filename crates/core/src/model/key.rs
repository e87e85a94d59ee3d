use render_profile_protocol::SharedStr;
use serde::{Deserialize, Serialize};

/// Structural identity of a node among its siblings.
///
/// Names repeat (the same shader or stage can run many times under one
/// parent), so the key pairs the name with the node's ordinal among
/// same-named siblings. `duplicate` is zero except when the merger had to
/// disambiguate two siblings that carried the same explicit ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub name: SharedStr,
    pub ordinal: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duplicate: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl NodeKey {
    pub fn new(name: impl Into<SharedStr>, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            ordinal,
            duplicate: 0,
        }
    }

    /// The same key, marked as the `duplicate`-th repeat at its level.
    pub fn disambiguated(&self, duplicate: u32) -> Self {
        Self {
            name: self.name.clone(),
            ordinal: self.ordinal,
            duplicate,
        }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if self.ordinal > 0 {
            write!(f, "[{}]", self.ordinal)?;
        }
        if self.duplicate > 0 {
            write!(f, "#{}", self.duplicate)?;
        }
        Ok(())
    }
}

/// Render a key path as `a/b[1]/c`.
pub fn format_path<'a>(keys: impl IntoIterator<Item = &'a NodeKey>) -> String {
    let mut out = String::new();
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(&key.to_string());
    }
    out
}
