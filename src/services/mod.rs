pub mod booking;
pub mod calendar;
pub mod chat;
pub mod checkout;
pub mod earnings;
pub mod messaging;
pub mod notify;
pub mod payments;
pub mod pricing;
pub mod reminders;
pub mod rooms;
pub mod scheduling;
pub mod video;
pub mod workflow;
