pub mod annotate;
pub mod bbox;
pub mod coco_classes;
pub mod detection;
pub mod error;
pub mod frame_times;
pub mod label_set;
pub mod pipeline;
pub mod progress;
pub mod result_record;
pub mod video_meta;
