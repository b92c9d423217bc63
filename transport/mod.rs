pub mod stream;

/// Connection surface the channel sends encoded frames through.
///
/// `send` queues best-effort and must never block the calling thread; the
/// connection owns delivery. Implementations are shared between caller
/// threads and the receive pump.
pub trait Transport: Send + Sync {
    fn send(&self, frame: Vec<u8>);

    fn is_connected(&self) -> bool;
}
