use bytes::Bytes;

/// The capabilities a driver (simulator or socket runtime) lends to an engine.
/// Engines never touch sockets or clocks directly.
pub trait SystemContext {
    /// Hand an encoded datagram to the (possibly faulty) channel.
    fn send_datagram(&mut self, datagram: Bytes);

    /// Start a timer. Starting an id that is already armed adds a second
    /// expiry; use [`SystemContext::restart_timer`] to replace it.
    fn start_timer(&mut self, delay_ms: u64, timer_id: u32);

    /// Cancel every pending expiry of `timer_id`.
    fn cancel_timer(&mut self, timer_id: u32);

    /// Cancel then start, leaving exactly one pending expiry.
    fn restart_timer(&mut self, delay_ms: u64, timer_id: u32) {
        self.cancel_timer(timer_id);
        self.start_timer(delay_ms, timer_id);
    }

    /// Append in-order payload bytes to the output sink.
    fn deliver_data(&mut self, data: &[u8]);

    fn log(&mut self, message: &str);

    /// Current time in milliseconds on the driver's clock.
    fn now(&self) -> u64;

    /// Record a numeric sample (e.g. window occupancy) for later inspection.
    fn record_metric(&mut self, _name: &str, _value: f64) {}
}

/// An event-driven protocol engine.
pub trait TransportProtocol {
    /// Called once when the driver starts the endpoint.
    fn init(&mut self, _ctx: &mut dyn SystemContext) {}

    /// Called for every datagram that reaches this endpoint.
    fn on_datagram(&mut self, ctx: &mut dyn SystemContext, datagram: &[u8]);

    /// Called when a timer started through the context expires.
    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32);

    /// Whether the endpoint reached a terminal state.
    fn is_done(&self) -> bool {
        false
    }
}

impl<P: TransportProtocol + ?Sized> TransportProtocol for Box<P> {
    fn init(&mut self, ctx: &mut dyn SystemContext) {
        (**self).init(ctx)
    }

    fn on_datagram(&mut self, ctx: &mut dyn SystemContext, datagram: &[u8]) {
        (**self).on_datagram(ctx, datagram)
    }

    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32) {
        (**self).on_timer(ctx, timer_id)
    }

    fn is_done(&self) -> bool {
        (**self).is_done()
    }
}

/// Timer request recorded by [`ScopedContext`], in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Start { delay_ms: u64, timer_id: u32 },
    Cancel { timer_id: u32 },
}

/// Actions buffered during one engine callback. Drivers apply them after the
/// callback returns.
#[derive(Debug, Default)]
pub struct ActionBuffer {
    pub outgoing: Vec<Bytes>,
    pub timers: Vec<TimerCommand>,
    pub logs: Vec<String>,
    pub delivered: Vec<Vec<u8>>,
    pub metrics: Vec<(String, f64)>,
}

/// Context implementation that records into an [`ActionBuffer`].
pub struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: u64,
}

impl<'a> ScopedContext<'a> {
    pub fn new(buffer: &'a mut ActionBuffer, now: u64) -> Self {
        Self { buffer, now }
    }
}

impl SystemContext for ScopedContext<'_> {
    fn send_datagram(&mut self, datagram: Bytes) {
        self.buffer.outgoing.push(datagram);
    }

    fn start_timer(&mut self, delay_ms: u64, timer_id: u32) {
        self.buffer
            .timers
            .push(TimerCommand::Start { delay_ms, timer_id });
    }

    fn cancel_timer(&mut self, timer_id: u32) {
        self.buffer.timers.push(TimerCommand::Cancel { timer_id });
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.buffer.delivered.push(data.to_vec());
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.buffer.metrics.push((name.to_string(), value));
    }
}

/// Run one engine callback against a fresh buffer.
pub fn capture<F>(now: u64, f: F) -> ActionBuffer
where
    F: FnOnce(&mut dyn SystemContext),
{
    let mut buffer = ActionBuffer::default();
    {
        let mut ctx = ScopedContext::new(&mut buffer, now);
        f(&mut ctx);
    }
    buffer
}
