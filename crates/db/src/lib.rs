pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use repositories::{
    ActivitySettings, BookingRepository, InMemoryBookingRepository, InMemoryMessageLogRepository,
    InMemoryOutboundLogRepository, InMemoryPolicyRepository, InMemorySessionRepository,
    MessageLogRepository, OutboundLogRepository, PolicyRepository, RepositoryError,
    SessionRepository, SqlBookingRepository, SqlMessageLogRepository, SqlOutboundLogRepository,
    SqlPolicyRepository, SqlSessionRepository,
};
