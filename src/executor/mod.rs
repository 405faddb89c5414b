pub mod dispatcher;
pub mod operator;
