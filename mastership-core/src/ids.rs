//! Device & node identities, along with the roles a node may hold for a device.

use std::sync::Arc;

use derive_more::Display;

/// An opaque, globally unique identifier of a managed device.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "{}", _0)]
pub struct DeviceId(Arc<str>);

/// An opaque, globally unique identifier of a cluster controller instance.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display(fmt = "{}", _0)]
pub struct NodeId(Arc<str>);

macro_rules! impl_id {
    ($name:ident) => {
        impl $name {
            /// Create a new instance from the given value.
            pub fn new(id: impl AsRef<str>) -> Self {
                Self(Arc::from(id.as_ref()))
            }

            /// View this ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(val: &str) -> Self {
                Self::new(val)
            }
        }

        impl From<String> for $name {
            fn from(val: String) -> Self {
                Self(Arc::from(val))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_id!(DeviceId);
impl_id!(NodeId);

/// The role a node holds for a device.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum MastershipRole {
    /// The node is authorized to issue control operations to the device.
    #[display(fmt = "MASTER")]
    Master,
    /// The node is ranked to take over mastership, and passively mirrors device state.
    #[display(fmt = "STANDBY")]
    Standby,
    /// The node has no role for the device.
    #[display(fmt = "NONE")]
    None,
}
