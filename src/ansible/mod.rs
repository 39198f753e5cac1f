mod composer;
mod inventory;
mod inventory_renderer;
mod render_error;

pub use composer::*;
pub use inventory::*;
pub use inventory_renderer::*;
pub use render_error::*;
