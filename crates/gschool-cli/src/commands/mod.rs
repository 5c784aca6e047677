pub mod admin;
pub mod categories;
pub mod class;
pub mod classify;
pub mod classroom;
pub mod helpers;
pub mod presence;
pub mod scene;
