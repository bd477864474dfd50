mod articles;
mod schema;
mod sources;
mod types;
mod workflows;

pub use schema::Database;
pub use types::{
    Article, DatabaseError, Enrichment, NewArticle, PendingArticle, RunStatus, Source,
    WorkflowRunRow,
};
