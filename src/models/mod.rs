pub mod buckets;
pub mod session;

pub use buckets::{
    alerts_key, bucket_date, date_key, paths_key, stats_key, AlertRecord, DomainBucket,
    PathBucket, ALERTS_PREFIX, OVERFLOW_PATH, PATHS_PREFIX, PATH_CAP, STATS_PREFIX,
};
pub use session::{TrackedSession, SESSION_KEY};
