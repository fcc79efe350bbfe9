mod attachment;
mod comment;
mod priority;
mod project;
mod subtask;
mod ticket;
mod user;

pub use attachment::Attachment;
pub use comment::{Approval, Comment, HistoryEntry};
pub use priority::TicketPriority;
pub use project::{Agent, Project, ProjectMember};
pub use subtask::Subtask;
pub use ticket::{SubtaskProgress, Ticket, TicketStatus, WorkCategory, WorkType};
pub use user::{Role, User};
