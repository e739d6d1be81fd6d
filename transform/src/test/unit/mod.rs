pub mod qlinear;
