//! The transport seam.

/// One client's outbound half.
///
/// The transport layer (out of scope here) implements this for whatever
/// it frames messages onto. The engine only ever sends a full serialized
/// envelope or closes with a human-readable reason.
pub trait ClientSink {
    /// Delivers one serialized message.
    fn send(&mut self, message: &str);

    /// Terminates the connection with a reason the client can log.
    fn close(&mut self, reason: &str);
}
