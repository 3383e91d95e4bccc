pub mod functions;
pub mod schema;
pub mod seed;
pub mod serve;
