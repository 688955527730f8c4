//! 知识层：规范化、领域登记表抽象、历史与已拒绝答案

pub mod history;
pub mod normalize;
pub mod state;

pub use history::{HistoryEntry, RejectedAnswers};
pub use normalize::{first_token, normalize};
pub use state::{KnowledgeState, Registry};
