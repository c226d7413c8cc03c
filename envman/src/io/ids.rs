//! Identifier generation for groups and schemes.
//!
//! Ids are opaque strings. The default source combines a millisecond
//! timestamp with random bits so that ids created within the same tick stay
//! distinct and still sort roughly by creation time.

use chrono::Utc;
use uuid::Uuid;

pub trait IdSource {
    fn next_id(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeUuidIds;

impl IdSource for TimeUuidIds {
    fn next_id(&self) -> String {
        let millis = Utc::now().timestamp_millis();
        let random = Uuid::new_v4().simple().to_string();
        format!("{millis}-{}", &random[..12])
    }
}
