//! Administration back office: conversation lifecycle, broadcasts and the member directory feed.

pub mod broadcast;
pub mod conversations;
pub mod members;
