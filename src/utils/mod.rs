pub mod html;
pub mod session;
