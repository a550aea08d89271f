//! Optical mark recognition for paper forms: align a scanned form to a
//! template, then decide which answer bubbles are filled in.

pub mod align;
pub mod authoring;
pub mod debug;
pub mod fill;
pub mod form;
pub mod geometry;
pub mod image_utils;
pub mod interpret;
pub mod spots;
pub mod template;
pub mod types;

#[cfg(test)]
mod test_utils;
