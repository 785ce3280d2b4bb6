pub mod session;
pub mod yolov8;
