/// Demuxing NUT files.
///
/// Provides the [`NutReader`](read::NutReader) state machine, which parses the
/// headers and yields [`NutFrame`](crate::structs::frame::NutFrame)s, skipping
/// damaged spans by resynchronising on startcodes.
pub mod read;

/// Muxing NUT files.
///
/// Provides the [`NutWriter`](write::NutWriter) state machine and its
/// [`WriterConfig`](write::WriterConfig).
pub mod write;

/// Time ordered interleaving of frames from several streams.
pub mod reorder;

/// [`FrameProducer`](pipe::FrameProducer) and [`FrameConsumer`](pipe::FrameConsumer)
/// adapters with drivers connecting them to the writer and reader.
pub mod pipe;
