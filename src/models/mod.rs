pub mod availability;
pub mod booking;
pub mod earnings;
pub mod notification;
pub mod payment;
pub mod practitioner;
pub mod room;
pub mod service;
pub mod user;
pub mod workflow;

pub use availability::Availability;
pub use booking::{Booking, BookingStatus, PaymentStatus};
pub use earnings::{EarningsBalance, EarningsStatus, EarningsTransaction, Payout, PayoutStatus};
pub use notification::{ChatMessage, ConversationSummary, LiveEvent, Notification};
pub use payment::{CreditTransaction, Order, OrderStatus};
pub use practitioner::{Practitioner, Tier};
pub use room::Room;
pub use service::{Service, ServiceSession, ServiceType};
pub use user::User;
pub use workflow::WorkflowRun;
