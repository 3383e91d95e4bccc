// HTTP handlers, one module per route group under the mount path.
pub mod classes;
pub mod files;
pub mod functions;
pub mod system;
