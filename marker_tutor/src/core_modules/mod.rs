// Leaf-first: data containers, then geometry and decoding, then the stateful
// stages in the order a frame passes through them.
pub mod frame;
pub mod observation;
pub mod pixel;

pub mod dictionary;
pub mod quad;

pub mod component_resolver;
pub mod detection_cache;
pub mod marker_detector;
pub mod quality;
pub mod tutorial;
