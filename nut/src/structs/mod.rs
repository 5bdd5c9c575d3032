//! Data structures representing the packets and frames of a NUT file.
//!
//! Each packet type knows how to read its body from a [`NutInput`] and write
//! it to a [`NutOutput`]; [`packet`] provides the framing around the bodies.
//!
//! [`NutInput`]: crate::utils::bytestream_io::NutInput
//! [`NutOutput`]: crate::utils::bytestream_io::NutOutput

pub mod frame;
pub mod frame_code;
pub mod index;
pub mod info;
pub mod main_header;
pub mod packet;
pub mod startcode;
pub mod stream_header;
pub mod syncpoint;
