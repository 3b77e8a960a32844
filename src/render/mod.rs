pub mod canvas;
pub mod compositor;
pub mod text;
pub mod tiles;
