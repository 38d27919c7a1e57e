//! Identity and timestamp sources for new records

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Produces identities for created records
pub trait IdGenerator: Send + Sync {
    /// A new, unique identity
    fn generate(&self) -> String;
}

/// Random UUID v4 identities
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Source of lifecycle timestamps
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_generator_is_unique() {
        let ids: HashSet<String> = (0..100).map(|_| UuidGenerator.generate()).collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| Uuid::parse_str(id).is_ok()));
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let first = SystemClock.now();
        let second = SystemClock.now();
        assert!(second >= first);
    }
}
