//! In-memory fakes for the transport, recovery and control seams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::ble::connection::TransportRecovery;
use crate::ble::transport::{
    AttributeDescriptor, AttributeProperty, BleTransport, DiscoveredDevice, ServiceDescriptor,
};
use crate::ble::uuids::{ELEMENT_NAME, HEATER_TEMP_UUID, OPERATING_MODE_UUID, ROOM_TEMP_UUID};
use crate::control::{match_earliest, ControlInterface, ControlSession};
use crate::error::{Error, Result};
use crate::protocol::{decode_temperature, encode_temperature, DeviceAddress};

/// Address of the simulated element.
pub(crate) const ELEMENT: &str = "CC:22:37:10:43:4B";

/// Service grouping the three element attributes.
pub(crate) const ELEMENT_SERVICE_UUID: Uuid =
    Uuid::from_u128(0xd97352b0_d19e_11e2_9e96_0800200c9a66);

/// A write-only attribute that inspection must not read.
pub(crate) const WRITE_ONLY_UUID: Uuid = Uuid::from_u128(0xd97352b4_d19e_11e2_9e96_0800200c9a66);

pub(crate) fn element() -> DeviceAddress {
    DeviceAddress::parse(ELEMENT).unwrap()
}

struct ElementState {
    generation: u64,
    live: Option<u64>,
    connect_failures: u32,
    list_failures: u32,
    connect_calls: u32,
    disconnect_calls: u32,
    list_calls: u32,
    link_loss_at_list: Option<(u32, bool)>,
    room: [u8; 4],
    heater: [u8; 4],
    mode: Vec<u8>,
    frozen: bool,
    target_offset: f64,
    missing: HashSet<Uuid>,
    read_errors: HashSet<Uuid>,
    write_errors: HashSet<Uuid>,
    writes: Vec<(Uuid, Vec<u8>)>,
    devices: Vec<DiscoveredDevice>,
}

impl ElementState {
    fn check_link(&self, link: u64) -> Result<()> {
        if self.live == Some(link) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn apply_target(&self, block: &mut [u8; 4], data: &[u8]) -> Result<()> {
        let requested = decode_temperature(data)?.target;
        let stored = encode_temperature(requested + self.target_offset);
        block[2..].copy_from_slice(&stored[2..]);
        Ok(())
    }
}

/// Simulated element behind an in-memory transport.
///
/// Starts with room 20.9/20.0, heater 45.0/50.0 and mode 0. Writes to the
/// temperature attributes update the target bytes; writes to the mode
/// attribute replace the mode byte.
pub(crate) struct FakeTransport {
    state: Mutex<ElementState>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ElementState {
                generation: 0,
                live: None,
                connect_failures: 0,
                list_failures: 0,
                connect_calls: 0,
                disconnect_calls: 0,
                list_calls: 0,
                link_loss_at_list: None,
                room: [0x00, 0xD1, 0x00, 0xC8],
                heater: [0x01, 0xC3, 0x01, 0xF5],
                mode: vec![0],
                frozen: false,
                target_offset: 0.0,
                missing: HashSet::new(),
                read_errors: HashSet::new(),
                write_errors: HashSet::new(),
                writes: Vec::new(),
                devices: vec![DiscoveredDevice {
                    address: ELEMENT.to_string(),
                    name: Some(ELEMENT_NAME.to_string()),
                }],
            }),
        }
    }

    pub(crate) fn fail_next_connects(&self, n: u32) {
        self.state.lock().connect_failures = n;
    }

    pub(crate) fn fail_next_lists(&self, n: u32) {
        self.state.lock().list_failures = n;
    }

    pub(crate) fn connect_calls(&self) -> u32 {
        self.state.lock().connect_calls
    }

    pub(crate) fn disconnect_calls(&self) -> u32 {
        self.state.lock().disconnect_calls
    }

    pub(crate) fn list_calls(&self) -> u32 {
        self.state.lock().list_calls
    }

    /// Drop every link as if the element went out of range.
    pub(crate) fn drop_links(&self) {
        self.state.lock().live = None;
    }

    /// Drop the link while serving the `n`th attribute listing. With
    /// `permanent`, every later connect fails too.
    pub(crate) fn lose_link_at_list(&self, n: u32, permanent: bool) {
        self.state.lock().link_loss_at_list = Some((n, permanent));
    }

    /// Accept writes without changing any value.
    pub(crate) fn freeze_writes(&self) {
        self.state.lock().frozen = true;
    }

    /// Store every written target shifted by `offset`.
    pub(crate) fn set_target_offset(&self, offset: f64) {
        self.state.lock().target_offset = offset;
    }

    pub(crate) fn remove_attribute(&self, uuid: Uuid) {
        self.state.lock().missing.insert(uuid);
    }

    pub(crate) fn fail_reads(&self, uuid: Uuid) {
        self.state.lock().read_errors.insert(uuid);
    }

    pub(crate) fn fail_writes(&self, uuid: Uuid) {
        self.state.lock().write_errors.insert(uuid);
    }

    pub(crate) fn set_mode_byte(&self, mode: u8) {
        self.state.lock().mode = vec![mode];
    }

    pub(crate) fn set_devices(&self, devices: Vec<DiscoveredDevice>) {
        self.state.lock().devices = devices;
    }

    /// Every write accepted so far, in order.
    pub(crate) fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.state.lock().writes.clone()
    }

    pub(crate) fn mode_byte(&self) -> Option<u8> {
        self.state.lock().mode.first().copied()
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    type Link = u64;

    async fn connect(&self, _address: &DeviceAddress, _timeout: Duration) -> Result<u64> {
        let mut state = self.state.lock();
        state.connect_calls += 1;

        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(Error::Timeout {
                operation: "connect".to_string(),
            });
        }

        state.generation += 1;
        state.live = Some(state.generation);
        Ok(state.generation)
    }

    async fn is_connected(&self, link: &u64) -> bool {
        self.state.lock().live == Some(*link)
    }

    async fn disconnect(&self, link: &u64) -> Result<()> {
        let mut state = self.state.lock();
        state.disconnect_calls += 1;
        if state.live == Some(*link) {
            state.live = None;
        }
        Ok(())
    }

    async fn list_attributes(&self, link: &u64) -> Result<Vec<ServiceDescriptor>> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        state.check_link(*link)?;

        if state.list_failures > 0 {
            state.list_failures -= 1;
            return Err(Error::Timeout {
                operation: "service discovery".to_string(),
            });
        }

        if let Some((n, permanent)) = state.link_loss_at_list {
            if state.list_calls == n {
                state.live = None;
                if permanent {
                    state.connect_failures = u32::MAX;
                }
            }
        }

        let read_write = vec![AttributeProperty::Read, AttributeProperty::Write];
        let attributes = [ROOM_TEMP_UUID, HEATER_TEMP_UUID, OPERATING_MODE_UUID]
            .into_iter()
            .filter(|uuid| !state.missing.contains(uuid))
            .map(|uuid| AttributeDescriptor {
                uuid,
                properties: read_write.clone(),
            })
            .chain(std::iter::once(AttributeDescriptor {
                uuid: WRITE_ONLY_UUID,
                properties: vec![AttributeProperty::WriteWithoutResponse],
            }))
            .collect();

        Ok(vec![ServiceDescriptor {
            uuid: ELEMENT_SERVICE_UUID,
            attributes,
        }])
    }

    async fn read_attribute(&self, link: &u64, uuid: Uuid) -> Result<Vec<u8>> {
        let state = self.state.lock();
        state.check_link(*link)?;

        if state.read_errors.contains(&uuid) {
            return Err(Error::Timeout {
                operation: format!("read {}", uuid),
            });
        }

        match uuid {
            u if u == ROOM_TEMP_UUID => Ok(state.room.to_vec()),
            u if u == HEATER_TEMP_UUID => Ok(state.heater.to_vec()),
            u if u == OPERATING_MODE_UUID => Ok(state.mode.clone()),
            _ => Err(Error::AttributeNotFound {
                uuid: uuid.to_string(),
            }),
        }
    }

    async fn write_attribute(&self, link: &u64, uuid: Uuid, data: &[u8], _ack: bool) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.check_link(*link)?;

        if state.write_errors.contains(&uuid) {
            return Err(Error::Timeout {
                operation: format!("write {}", uuid),
            });
        }
        state.writes.push((uuid, data.to_vec()));
        if state.frozen {
            return Ok(());
        }

        if uuid == ROOM_TEMP_UUID {
            let mut block = state.room;
            state.apply_target(&mut block, data)?;
            state.room = block;
        } else if uuid == HEATER_TEMP_UUID {
            let mut block = state.heater;
            state.apply_target(&mut block, data)?;
            state.heater = block;
        } else if uuid == OPERATING_MODE_UUID {
            state.mode = data.to_vec();
        }
        Ok(())
    }

    async fn scan(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        Ok(self.state.lock().devices.clone())
    }

    async fn find_by_address(
        &self,
        address: &DeviceAddress,
        _timeout: Duration,
    ) -> Result<Option<DiscoveredDevice>> {
        Ok(self
            .state
            .lock()
            .devices
            .iter()
            .find(|d| d.address.eq_ignore_ascii_case(address.as_str()))
            .cloned())
    }
}

/// Recovery action that only counts invocations.
#[derive(Debug, Default)]
pub(crate) struct CountingRecovery {
    count: AtomicU32,
}

impl CountingRecovery {
    pub(crate) fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportRecovery for CountingRecovery {
    async fn recover(&self) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ControlLog {
    rules: HashMap<String, VecDeque<String>>,
    sent: Vec<String>,
    waits: Vec<Duration>,
    opens: u32,
    closes: u32,
}

/// Control interface that answers each command with canned output.
///
/// A command with a sequence of outputs consumes one per send and then
/// keeps repeating the last. Unknown commands produce no output. Waits
/// never block: a pattern that is not already buffered times out at once.
pub(crate) struct ScriptedControl {
    greeting: String,
    log: Arc<Mutex<ControlLog>>,
}

impl ScriptedControl {
    /// `greeting` is buffered as soon as a session opens.
    pub(crate) fn new(greeting: &str) -> Self {
        Self {
            greeting: greeting.to_string(),
            log: Arc::new(Mutex::new(ControlLog::default())),
        }
    }

    /// Answer `command` with `output`, replacing any earlier rule.
    pub(crate) fn on(self, command: &str, output: &str) -> Self {
        self.on_sequence(command, &[output])
    }

    /// Answer successive sends of `command` with `outputs` in turn.
    pub(crate) fn on_sequence(self, command: &str, outputs: &[&str]) -> Self {
        self.log.lock().rules.insert(
            command.to_string(),
            outputs.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Every line sent across all sessions.
    pub(crate) fn sent(&self) -> Vec<String> {
        self.log.lock().sent.clone()
    }

    /// Timeout of every pattern wait, in order.
    pub(crate) fn waits(&self) -> Vec<Duration> {
        self.log.lock().waits.clone()
    }

    pub(crate) fn opens(&self) -> u32 {
        self.log.lock().opens
    }

    pub(crate) fn closes(&self) -> u32 {
        self.log.lock().closes
    }
}

#[async_trait]
impl ControlInterface for ScriptedControl {
    async fn open(&self) -> Result<Box<dyn ControlSession>> {
        self.log.lock().opens += 1;
        Ok(Box::new(ScriptedSession {
            log: self.log.clone(),
            buffer: self.greeting.clone(),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    log: Arc<Mutex<ControlLog>>,
    buffer: String,
    closed: bool,
}

#[async_trait]
impl ControlSession for ScriptedSession {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        let mut log = self.log.lock();
        log.sent.push(line.to_string());

        let output = match log.rules.get_mut(line) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        if let Some(output) = output {
            self.buffer.push_str(&output);
        }
        Ok(())
    }

    async fn await_pattern(
        &mut self,
        patterns: &[regex::Regex],
        timeout: Duration,
    ) -> Result<Option<usize>> {
        self.log.lock().waits.push(timeout);

        Ok(match_earliest(&self.buffer, patterns).map(|(index, end)| {
            self.buffer.drain(..end);
            index
        }))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.log.lock().closes += 1;
        }
        Ok(())
    }
}
