pub mod current_state_queries;
pub mod history_queries;
pub mod mapping_queries;
