//! GATT database discovery
//!
//! Three chained state machines walk the peer's attribute table: primary
//! service discovery, characteristic discovery, then descriptor discovery.
//! Each machine issues exactly one primitive at a time and resumes from its
//! saved indices when the completion event arrives. `AttributeNotFound` is
//! the expected "no more items in this range" signal everywhere; any other
//! non-success status aborts the whole pipeline with that status and
//! whatever partial tree was assembled.
//!
//! Vendor 128-bit UUIDs arrive from the link layer as unresolved markers
//! until their base is registered. Both the service and characteristic
//! machines finish with a resolution pass that point-reads each unresolved
//! declaration, registers the base and patches the UUID in place. The pass
//! always runs to exhaustion or to the next outstanding read; a declaration
//! payload of the wrong length is a decode error that leaves the UUID
//! unresolved and moves on.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::driver::events::{
    BleEvent, CharacteristicDiscoveryEvent, DescriptorDiscoveryEvent, EventKind,
    ReadResponseEvent, ServiceDiscoveryEvent,
};
use crate::driver::{
    BleDriver, DiscoveredDescriptor, EventDispatcher, GattStatus, SubscriptionId, ATT_HANDLE_MIN,
};
use crate::error::GattError;
use crate::peer::Peer;
use crate::uuid::UuidRegistry;

use super::types::{Characteristic, Descriptor, Service};

/// Final outcome of a discovery stage (and of the whole pipeline)
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub status: GattStatus,
    pub services: Vec<Service>,
}

pub type DiscoveryCallback = Box<dyn FnOnce(DiscoveryResult) + Send>;

/// Working set shared by the three machines: the tree built so far and the
/// resume indices for the event-driven loops
#[derive(Debug, Default)]
struct DiscoveryState {
    current_handle: u16,
    services: Vec<Service>,
    service_index: usize,
    char_index: usize,
}

impl DiscoveryState {
    fn reset(&mut self) {
        self.current_handle = ATT_HANDLE_MIN;
        self.services = Vec::new();
        self.service_index = 0;
        self.char_index = 0;
    }

    fn end_of_services(&self) -> bool {
        self.service_index >= self.services.len()
    }

    fn finish(&mut self, status: GattStatus) -> DiscoveryResult {
        DiscoveryResult {
            status,
            services: std::mem::take(&mut self.services),
        }
    }
}

struct ServiceDiscoverer {
    driver: Arc<dyn BleDriver>,
    peer: Arc<Peer>,
    registry: Arc<UuidRegistry>,
    state: Mutex<DiscoveryState>,
}

impl ServiceDiscoverer {
    fn new(driver: Arc<dyn BleDriver>, peer: Arc<Peer>, registry: Arc<UuidRegistry>) -> Self {
        Self {
            driver,
            peer,
            registry,
            state: Mutex::new(DiscoveryState::default()),
        }
    }

    fn start(&self) -> Result<(), GattError> {
        let conn = self.peer.conn_handle().ok_or(GattError::NotConnected)?;
        let mut state = self.state.lock().unwrap();
        state.reset();
        self.driver
            .discover_primary_services(conn, state.current_handle)?;
        Ok(())
    }

    fn handle_services_discovered(&self, event: &ServiceDiscoveryEvent) -> Option<DiscoveryResult> {
        if !self.peer.matches(event.conn_handle) {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        match event.status {
            GattStatus::Success => {
                for s in &event.services {
                    state
                        .services
                        .push(Service::new(s.uuid, s.start_handle, s.end_handle));
                }
                match event.services.last() {
                    Some(last) if last.end_handle != 0xFFFF => {
                        // More of the table may follow the last end handle.
                        if let Err(e) = self
                            .driver
                            .discover_primary_services(event.conn_handle, last.end_handle + 1)
                        {
                            log::error!("Failed to continue service discovery: {}", e);
                            return Some(state.finish(GattStatus::Unknown));
                        }
                        None
                    }
                    _ => self.resolve_uuids(&mut state),
                }
            }
            // End of the attribute table.
            GattStatus::AttributeNotFound => self.resolve_uuids(&mut state),
            status => Some(state.finish(status)),
        }
    }

    /// Walks services from the resume index, issuing a declaration read for
    /// the first unresolved UUID. Completes when none remain.
    fn resolve_uuids(&self, state: &mut DiscoveryState) -> Option<DiscoveryResult> {
        while !state.end_of_services() {
            let service = &state.services[state.service_index];
            if !service.uuid.is_resolved() {
                let start_handle = service.start_handle;
                let conn = match self.peer.conn_handle() {
                    Some(conn) => conn,
                    None => return Some(state.finish(GattStatus::Unknown)),
                };
                if let Err(e) = self.driver.read(conn, start_handle, 0) {
                    log::error!("Failed to read service declaration: {}", e);
                    return Some(state.finish(GattStatus::Unknown));
                }
                return None;
            }
            state.service_index += 1;
        }
        Some(state.finish(GattStatus::Success))
    }

    fn handle_read_response(&self, event: &ReadResponseEvent) -> Option<DiscoveryResult> {
        if !self.peer.matches(event.conn_handle) {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        if state.end_of_services() {
            return None;
        }
        if event.handle != state.services[state.service_index].start_handle {
            return None;
        }

        match self.registry.resolve_bytes(self.driver.as_ref(), &event.data) {
            Ok(uuid) => {
                log::info!("Resolved service UUID: {}", uuid);
                let service_index = state.service_index;
                state.services[service_index].uuid = uuid;
            }
            // Leave the UUID unresolved and move on.
            Err(e) => log::error!(
                "Failed to resolve service UUID ({}): {}",
                hex::encode(&event.data),
                e
            ),
        }

        state.service_index += 1;
        self.resolve_uuids(&mut state)
    }
}

struct CharacteristicDiscoverer {
    driver: Arc<dyn BleDriver>,
    peer: Arc<Peer>,
    registry: Arc<UuidRegistry>,
    state: Mutex<DiscoveryState>,
}

impl CharacteristicDiscoverer {
    fn new(driver: Arc<dyn BleDriver>, peer: Arc<Peer>, registry: Arc<UuidRegistry>) -> Self {
        Self {
            driver,
            peer,
            registry,
            state: Mutex::new(DiscoveryState::default()),
        }
    }

    /// Begins characteristic discovery over `services`. Returns
    /// `Ok(Some(..))` when there is nothing to discover.
    fn start(&self, services: Vec<Service>) -> Result<Option<DiscoveryResult>, GattError> {
        let mut state = self.state.lock().unwrap();
        state.reset();
        state.services = services;
        if state.services.is_empty() {
            return Ok(Some(state.finish(GattStatus::Success)));
        }
        self.discover_current(&state)?;
        Ok(None)
    }

    fn discover_current(&self, state: &DiscoveryState) -> Result<(), GattError> {
        let conn = self.peer.conn_handle().ok_or(GattError::NotConnected)?;
        let service = &state.services[state.service_index];
        self.driver
            .discover_characteristics(conn, service.start_handle, service.end_handle)?;
        Ok(())
    }

    fn handle_characteristics_discovered(
        &self,
        event: &CharacteristicDiscoveryEvent,
    ) -> Option<DiscoveryResult> {
        if !self.peer.matches(event.conn_handle) {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        match event.status {
            // Done with this service's range.
            GattStatus::AttributeNotFound => self.advance_service(&mut state),
            GattStatus::Success => {
                let service_index = state.service_index;
                let service = &mut state.services[service_index];
                let service_end = service.end_handle;
                for c in &event.characteristics {
                    service.add_characteristic(Characteristic::new(
                        c.uuid,
                        c.declaration_handle,
                        c.value_handle,
                        c.properties,
                    ));
                }
                let Some(last) = event.characteristics.last() else {
                    return self.advance_service(&mut state);
                };
                if last.value_handle >= service_end {
                    return self.advance_service(&mut state);
                }
                let (next_start, end) = (last.declaration_handle + 1, service_end);
                if let Err(e) =
                    self.driver
                        .discover_characteristics(event.conn_handle, next_start, end)
                {
                    log::error!("Failed to continue characteristic discovery: {}", e);
                    return Some(state.finish(GattStatus::Unknown));
                }
                None
            }
            status => Some(state.finish(status)),
        }
    }

    fn advance_service(&self, state: &mut DiscoveryState) -> Option<DiscoveryResult> {
        state.service_index += 1;
        state.char_index = 0;
        if state.end_of_services() {
            state.service_index = 0;
            return self.resolve_uuids(state);
        }
        if let Err(e) = self.discover_current(state) {
            log::error!("Failed to start characteristic discovery: {}", e);
            return Some(state.finish(GattStatus::Unknown));
        }
        None
    }

    fn resolve_uuids(&self, state: &mut DiscoveryState) -> Option<DiscoveryResult> {
        while !state.end_of_services() {
            let chars = &state.services[state.service_index].characteristics;
            while state.char_index < chars.len() {
                let c = &chars[state.char_index];
                if !c.uuid.is_resolved() {
                    let decl_handle = c.declaration_handle;
                    let conn = match self.peer.conn_handle() {
                        Some(conn) => conn,
                        None => return Some(state.finish(GattStatus::Unknown)),
                    };
                    if let Err(e) = self.driver.read(conn, decl_handle, 0) {
                        log::error!("Failed to read characteristic declaration: {}", e);
                        return Some(state.finish(GattStatus::Unknown));
                    }
                    return None;
                }
                state.char_index += 1;
            }
            state.char_index = 0;
            state.service_index += 1;
        }
        Some(state.finish(GattStatus::Success))
    }

    fn handle_read_response(&self, event: &ReadResponseEvent) -> Option<DiscoveryResult> {
        if !self.peer.matches(event.conn_handle) {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        if state.end_of_services() {
            return None;
        }
        let chars = &state.services[state.service_index].characteristics;
        if state.char_index >= chars.len()
            || event.handle != chars[state.char_index].declaration_handle
        {
            return None;
        }

        // Declaration layout: properties (1 byte), value handle (2 bytes LE),
        // then the 128-bit UUID.
        if event.data.len() > 3 {
            let mut header = Cursor::new(&event.data);
            let _properties = header.read_u8().unwrap_or_default();
            let _value_handle = header.read_u16::<LittleEndian>().unwrap_or_default();
            match self
                .registry
                .resolve_bytes(self.driver.as_ref(), &event.data[3..])
            {
                Ok(uuid) => {
                    log::info!("Resolved characteristic UUID: {}", uuid);
                    let index = state.char_index;
                    let service_index = state.service_index;
                    state.services[service_index].characteristics[index].uuid = uuid;
                }
                Err(e) => log::error!(
                    "Failed to resolve characteristic UUID ({}): {}",
                    hex::encode(&event.data[3..]),
                    e
                ),
            }
        } else {
            log::error!(
                "Malformed characteristic declaration: {}",
                hex::encode(&event.data)
            );
        }

        state.char_index += 1;
        if state.char_index >= state.services[state.service_index].characteristics.len() {
            state.service_index += 1;
            state.char_index = 0;
        }
        self.resolve_uuids(&mut state)
    }
}

struct DescriptorDiscoverer {
    driver: Arc<dyn BleDriver>,
    peer: Arc<Peer>,
    state: Mutex<DiscoveryState>,
}

impl DescriptorDiscoverer {
    fn new(driver: Arc<dyn BleDriver>, peer: Arc<Peer>) -> Self {
        Self {
            driver,
            peer,
            state: Mutex::new(DiscoveryState::default()),
        }
    }

    fn start(&self, services: Vec<Service>) -> Result<Option<DiscoveryResult>, GattError> {
        let mut state = self.state.lock().unwrap();
        state.reset();
        state.services = services;
        if state.services.is_empty() {
            return Ok(Some(state.finish(GattStatus::Success)));
        }
        Ok(self.discover_next_range(&mut state))
    }

    /// Finds the first handle not yet covered by any characteristic and
    /// issues a descriptor discovery from there to the end of the table.
    /// Completes when nothing is missing anywhere.
    fn discover_next_range(&self, state: &mut DiscoveryState) -> Option<DiscoveryResult> {
        let mut found: Option<u16> = None;
        let mut first_service = true;
        'outer: for service in &state.services[state.service_index..] {
            let start_char = if first_service { state.char_index } else { 0 };
            first_service = false;
            for characteristic in &service.characteristics[start_char.min(service.characteristics.len())..]
            {
                if let Some(handle) = characteristic.missing_handles().first() {
                    found = Some(*handle);
                    break 'outer;
                }
            }
        }

        let Some(start_handle) = found else {
            log::info!("No more handles left to discover");
            return Some(state.finish(GattStatus::Success));
        };
        state.current_handle = start_handle;
        let end_handle = state.services.last().map(|s| s.end_handle).unwrap_or(0xFFFF);
        let conn = match self.peer.conn_handle() {
            Some(conn) => conn,
            None => return Some(state.finish(GattStatus::Unknown)),
        };
        if let Err(e) = self
            .driver
            .discover_descriptors(conn, start_handle, end_handle)
        {
            log::error!("Failed to start descriptor discovery: {}", e);
            return Some(state.finish(GattStatus::Unknown));
        }
        None
    }

    fn handle_descriptors_discovered(
        &self,
        event: &DescriptorDiscoveryEvent,
    ) -> Option<DiscoveryResult> {
        if !self.peer.matches(event.conn_handle) {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        match event.status {
            GattStatus::AttributeNotFound => Some(state.finish(GattStatus::Success)),
            GattStatus::Success => {
                for descriptor in &event.descriptors {
                    Self::route_descriptor(&mut state, descriptor);
                }
                if state.end_of_services() {
                    return Some(state.finish(GattStatus::Success));
                }
                let Some(last) = event.descriptors.last() else {
                    return Some(state.finish(GattStatus::Success));
                };
                state.current_handle = last.handle + 1;
                let table_end = state.services.last().map(|s| s.end_handle).unwrap_or(0);
                if last.handle >= table_end {
                    return Some(state.finish(GattStatus::Success));
                }
                self.discover_next_range(&mut state)
            }
            status => Some(state.finish(status)),
        }
    }

    /// Routes a discovered attribute to its owner: the service itself when
    /// the handle is the service declaration, otherwise the characteristic
    /// whose handle range contains it.
    fn route_descriptor(state: &mut DiscoveryState, descriptor: &DiscoveredDescriptor) {
        loop {
            if state.end_of_services() {
                return;
            }
            let service = &mut state.services[state.service_index];
            if descriptor.handle < service.start_handle {
                log::error!(
                    "Got attribute handle {} which is before service handle {}",
                    descriptor.handle,
                    service.start_handle
                );
                return;
            }
            if descriptor.handle > service.end_handle {
                state.service_index += 1;
                state.char_index = 0;
                continue;
            }
            if descriptor.handle == service.start_handle {
                service.attributes.push(Descriptor {
                    uuid: descriptor.uuid,
                    handle: descriptor.handle,
                });
                return;
            }
            for characteristic in &mut service.characteristics {
                if characteristic.declaration_handle <= descriptor.handle
                    && descriptor.handle <= characteristic.end_handle
                {
                    characteristic.descriptors.push(Descriptor {
                        uuid: descriptor.uuid,
                        handle: descriptor.handle,
                    });
                    return;
                }
            }
            log::error!(
                "Unable to find characteristic for attribute handle {}",
                descriptor.handle
            );
            return;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiscoveryStage {
    Idle,
    Services,
    Characteristics,
    Descriptors,
}

/// Runs the three discovery stages in strict sequence and reports one
/// completion carrying the final status and the assembled tree
pub struct DatabaseDiscoverer {
    peer: Arc<Peer>,
    service_discoverer: ServiceDiscoverer,
    characteristic_discoverer: CharacteristicDiscoverer,
    descriptor_discoverer: DescriptorDiscoverer,
    stage: Mutex<DiscoveryStage>,
    on_complete: Mutex<Option<DiscoveryCallback>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl DatabaseDiscoverer {
    pub fn new(
        driver: Arc<dyn BleDriver>,
        peer: Arc<Peer>,
        registry: Arc<UuidRegistry>,
        dispatcher: &EventDispatcher,
    ) -> Arc<Self> {
        let discoverer = Arc::new(Self {
            service_discoverer: ServiceDiscoverer::new(
                Arc::clone(&driver),
                Arc::clone(&peer),
                Arc::clone(&registry),
            ),
            characteristic_discoverer: CharacteristicDiscoverer::new(
                Arc::clone(&driver),
                Arc::clone(&peer),
                registry,
            ),
            descriptor_discoverer: DescriptorDiscoverer::new(driver, Arc::clone(&peer)),
            peer,
            stage: Mutex::new(DiscoveryStage::Idle),
            on_complete: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&discoverer);
        let ids = dispatcher.subscribe_all(
            &[
                EventKind::ServicesDiscovered,
                EventKind::CharacteristicsDiscovered,
                EventKind::DescriptorsDiscovered,
                EventKind::ReadResponse,
                EventKind::Disconnected,
            ],
            Arc::new(move |event| {
                if let Some(discoverer) = weak.upgrade() {
                    discoverer.handle_event(event);
                }
            }),
        );
        *discoverer.subscriptions.lock().unwrap() = ids;
        discoverer
    }

    pub fn detach(&self, dispatcher: &EventDispatcher) {
        for id in self.subscriptions.lock().unwrap().drain(..) {
            dispatcher.unsubscribe(id);
        }
    }

    /// Starts the pipeline. Fails with `InvalidState` when a discovery is
    /// already running.
    pub fn start(&self, on_complete: DiscoveryCallback) -> Result<(), GattError> {
        {
            let mut stage = self.stage.lock().unwrap();
            if *stage != DiscoveryStage::Idle {
                return Err(GattError::InvalidState);
            }
            *stage = DiscoveryStage::Services;
        }
        *self.on_complete.lock().unwrap() = Some(on_complete);
        log::info!("Starting database discovery");
        if let Err(e) = self.service_discoverer.start() {
            *self.stage.lock().unwrap() = DiscoveryStage::Idle;
            self.on_complete.lock().unwrap().take();
            return Err(e);
        }
        Ok(())
    }

    fn handle_event(&self, event: &BleEvent) {
        let stage = *self.stage.lock().unwrap();
        match (stage, event) {
            (DiscoveryStage::Services, BleEvent::ServicesDiscovered(e)) => {
                if let Some(result) = self.service_discoverer.handle_services_discovered(e) {
                    self.on_services_complete(result);
                }
            }
            (DiscoveryStage::Services, BleEvent::ReadResponse(e)) => {
                if let Some(result) = self.service_discoverer.handle_read_response(e) {
                    self.on_services_complete(result);
                }
            }
            (DiscoveryStage::Characteristics, BleEvent::CharacteristicsDiscovered(e)) => {
                if let Some(result) = self
                    .characteristic_discoverer
                    .handle_characteristics_discovered(e)
                {
                    self.on_characteristics_complete(result);
                }
            }
            (DiscoveryStage::Characteristics, BleEvent::ReadResponse(e)) => {
                if let Some(result) = self.characteristic_discoverer.handle_read_response(e) {
                    self.on_characteristics_complete(result);
                }
            }
            (DiscoveryStage::Descriptors, BleEvent::DescriptorsDiscovered(e)) => {
                if let Some(result) = self
                    .descriptor_discoverer
                    .handle_descriptors_discovered(e)
                {
                    self.on_descriptors_complete(result);
                }
            }
            (stage, BleEvent::Disconnected(e)) => {
                if stage != DiscoveryStage::Idle && self.peer.matches(e.conn_handle) {
                    log::warn!("Database discovery aborted by disconnect");
                    self.finish(DiscoveryResult {
                        status: GattStatus::Unknown,
                        services: Vec::new(),
                    });
                }
            }
            _ => {}
        }
    }

    fn on_services_complete(&self, result: DiscoveryResult) {
        if !result.status.is_success() {
            log::error!("Error discovering services: {:?}", result.status);
            self.finish(DiscoveryResult {
                status: result.status,
                services: Vec::new(),
            });
            return;
        }
        log::info!("Service discovery complete");
        match self.characteristic_discoverer.start(result.services) {
            Ok(None) => *self.stage.lock().unwrap() = DiscoveryStage::Characteristics,
            Ok(Some(result)) => self.on_characteristics_complete(result),
            Err(e) => {
                log::error!("Failed to start characteristic discovery: {}", e);
                self.finish(DiscoveryResult {
                    status: GattStatus::Unknown,
                    services: Vec::new(),
                });
            }
        }
    }

    fn on_characteristics_complete(&self, result: DiscoveryResult) {
        if !result.status.is_success() {
            log::error!("Error discovering characteristics: {:?}", result.status);
            self.finish(DiscoveryResult {
                status: result.status,
                services: Vec::new(),
            });
            return;
        }
        log::info!("Characteristic discovery complete");
        match self.descriptor_discoverer.start(result.services) {
            Ok(None) => *self.stage.lock().unwrap() = DiscoveryStage::Descriptors,
            Ok(Some(result)) => self.on_descriptors_complete(result),
            Err(e) => {
                log::error!("Failed to start descriptor discovery: {}", e);
                self.finish(DiscoveryResult {
                    status: GattStatus::Unknown,
                    services: Vec::new(),
                });
            }
        }
    }

    fn on_descriptors_complete(&self, result: DiscoveryResult) {
        log::info!("Descriptor discovery complete");
        self.finish(result);
    }

    fn finish(&self, result: DiscoveryResult) {
        *self.stage.lock().unwrap() = DiscoveryStage::Idle;
        log::info!(
            "Database discovery complete: {:?}, {} services",
            result.status,
            result.services.len()
        );
        let callback = self.on_complete.lock().unwrap().take();
        if let Some(callback) = callback {
            callback(result);
        }
    }
}
