mod session;

use std::fmt;

pub use self::session::{
    EmptyHandshakeSessionBuilder, FilledHandshakeSessionBuilder, HandshakeSessionBuilder, WithPackage, WithRole,
    WithoutPackage, WithoutRole,
};

pub trait ToAssign: fmt::Debug {}
pub trait Assigned: ToAssign {}
pub trait NotAssigned: ToAssign {}
