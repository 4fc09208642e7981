mod payment;
mod simple_form;
mod wait_for_event;

pub use payment::Payment;
pub use simple_form::{SimpleForm, SimpleFormConfig};
pub use wait_for_event::{WaitForEvent, WaitForEventConfig};
