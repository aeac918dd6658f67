//! USB 코어 시스템
//!
//! [`UsbSubsystem`]은 초기화 때 한 번 만들어지는 명시적 컨텍스트입니다.
//! 레지스터 블록, 플랫폼, 채널 풀, 디바이스 트리를 모두 소유하며, 위쪽 계층은
//! 이 값을 통해서만 드라이버를 사용합니다.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::config::UsbHostConfig;
use crate::drivers::mailbox::Mailbox;
use crate::drivers::mmio::RegisterBlock;
use crate::drivers::platform::Platform;
use crate::drivers::usb::channel::ChannelPool;
use crate::drivers::usb::descriptor::{parse_string_descriptor, DescriptorType, DeviceDescriptor};
use crate::drivers::usb::device::{DeviceId, UsbDevice, UsbDeviceState, UsbSpeed};
use crate::drivers::usb::driver::DriverRegistry;
use crate::drivers::usb::dwc::DwcController;
use crate::drivers::usb::dwc_regs::MAX_CHANNELS;
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::host_controller::UsbHostController;
use crate::drivers::usb::interrupt::{Dispatcher, PortEvents};
use crate::drivers::usb::request::{PortFeature, UsbControlRequest};
use crate::drivers::usb::roothub::{parse_port_status, PortChange, PortStatus, RootHub, ROOT_PORT};
use crate::drivers::usb::transfer::{Pipe, TransferEngine, TransferRequest};
use crate::drivers::usb::tree::DeviceTree;
use crate::kernel::error_recovery::{record_recovery_event, RecoveryEvent};
use crate::kernel::event::Event;

/// 문자열 디스크립터 요청 길이 (bLength 최대값)
const STRING_DESCRIPTOR_REQUEST: usize = 255;

/// USB 서브시스템
pub struct UsbSubsystem<R: RegisterBlock + 'static, P: Platform + 'static> {
    pub(crate) config: UsbHostConfig,
    pub(crate) platform: Arc<P>,
    controller: DwcController<R, P>,
    engine: TransferEngine<R, P>,
    dispatcher: Arc<Dispatcher<R, P>>,
    port_events: Arc<PortEvents>,
    pub(crate) devices: Mutex<DeviceTree>,
    pub(crate) drivers: DriverRegistry,
    /// 주소 0을 쓰고 있는 디바이스 (한 번에 하나)
    pub(crate) default_address: Mutex<Option<DeviceId>>,
    /// 주소 0이 풀릴 때마다 올라감
    pub(crate) address_event: Event,
}

impl<R: RegisterBlock + 'static, P: Platform + 'static> UsbSubsystem<R, P> {
    /// 서브시스템 초기화
    ///
    /// 전원 인가, 컨트롤러 초기화, 루트 허브 등록까지 수행합니다.
    /// 어느 단계든 실패하면 컨트롤러를 정지하고 에러를 돌려줍니다.
    pub fn initialize<M: RegisterBlock>(
        config: UsbHostConfig,
        regs: Arc<R>,
        platform: Arc<P>,
        mailbox: &Mailbox<M>,
    ) -> Result<Self, UsbError> {
        crate::log_info!("Initializing USB subsystem...");

        let channels = Arc::new(ChannelPool::new(config.channel_count.min(MAX_CHANNELS)));
        let port_events = Arc::new(PortEvents::new());
        let dispatcher = Arc::new(Dispatcher::new(
            regs.clone(),
            platform.clone(),
            channels.clone(),
            port_events.clone(),
        ));

        let controller = DwcController::new(regs.clone(), platform.clone(), config);
        controller.bring_up(mailbox, dispatcher.clone())?;

        let root_hub = RootHub::new(
            regs.clone(),
            port_events.clone(),
            config.port_reset_ms,
            config.reset_recovery_ms,
        );
        let engine = TransferEngine::new(regs, platform.clone(), channels, root_hub, &config);

        let subsystem = Self {
            config,
            platform,
            controller,
            engine,
            dispatcher,
            port_events,
            devices: Mutex::new(DeviceTree::new()),
            drivers: DriverRegistry::new(),
            default_address: Mutex::new(None),
            address_event: Event::new(),
        };

        if let Err(e) = subsystem.attach_root_hub() {
            crate::log_error!("Root hub setup failed: {}", e);
            subsystem.controller.stop();
            return Err(e);
        }

        crate::log_info!("USB subsystem initialized");
        Ok(subsystem)
    }

    /// 루트 허브 등록: 소프트웨어 경로로 디스크립터를 읽고 바로 구성 상태로
    fn attach_root_hub(&self) -> Result<DeviceId, UsbError> {
        let root = self.devices.lock().allocate(None, 0, UsbSpeed::High)?;
        self.update(root, |d| {
            d.set_address(DeviceTree::address_for(root));
            d.set_state(UsbDeviceState::Connected);
        })?;

        let mut buf = [0u8; DeviceDescriptor::LENGTH];
        self.get_descriptor(root, DescriptorType::Device, 0, &mut buf)?;
        let descriptor = DeviceDescriptor::parse(&buf)?;
        self.set_configuration(root, 1)?;
        self.update(root, |d| {
            d.set_device_descriptor(descriptor);
            d.set_state(UsbDeviceState::Configured);
        })?;
        self.read_device_strings(root);
        crate::log_info!("Root hub attached as {}", root);

        self.control_msg(root, UsbControlRequest::new_set_port_feature(ROOT_PORT, PortFeature::Power), &mut [])?;
        // 이미 꽂혀 있는 디바이스도 작업자가 한 번 확인하도록
        self.port_events.signal(&*self.platform);
        Ok(root)
    }

    pub fn config(&self) -> &UsbHostConfig {
        &self.config
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    pub fn controller(&self) -> &DwcController<R, P> {
        &self.controller
    }

    pub fn channels(&self) -> &ChannelPool {
        self.engine.channels()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<R, P>> {
        &self.dispatcher
    }

    pub fn port_events(&self) -> &PortEvents {
        &self.port_events
    }

    pub fn root_hub(&self) -> Option<DeviceId> {
        self.devices.lock().root()
    }

    /// 디바이스 레코드 수정
    pub(crate) fn update<T>(&self, id: DeviceId, f: impl FnOnce(&mut UsbDevice) -> T) -> Result<T, UsbError> {
        let mut devices = self.devices.lock();
        let device = devices.get_mut(id).ok_or(UsbError::DeviceNotFound)?;
        if device.is_detaching() {
            return Err(UsbError::DeviceDetached);
        }
        Ok(f(device))
    }

    pub fn with_device<T>(&self, id: DeviceId, f: impl FnOnce(&UsbDevice) -> T) -> Option<T> {
        self.devices.lock().get(id).map(f)
    }

    pub fn device_state(&self, id: DeviceId) -> Option<UsbDeviceState> {
        self.with_device(id, UsbDevice::state)
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }

    /// 디바이스로 가는 파이프 정보
    ///
    /// 주소가 없는 디바이스는 기본 주소를 점유한 경우에만 전송할 수 있습니다.
    fn pipe_for(&self, id: DeviceId, endpoint: u8) -> Result<Pipe, UsbError> {
        let devices = self.devices.lock();
        let device = devices.get(id).ok_or(UsbError::DeviceNotFound)?;
        if device.is_detaching() || device.state() == UsbDeviceState::Disconnected {
            return Err(UsbError::DeviceDetached);
        }
        if !device.is_root_hub() && device.address() == 0 && *self.default_address.lock() != Some(id) {
            crate::log_warn!("{}: transfer at address 0 without holding it", id);
            return Err(UsbError::EnumerationBusy);
        }
        Ok(Pipe {
            device_address: device.address(),
            endpoint,
            max_packet_size: device.max_packet_size(),
            speed: device.speed(),
            is_root_hub: device.is_root_hub(),
        })
    }

    /// 전송 요청 제출 (submit-transfer)
    ///
    /// 요청은 완료될 때까지 엔진이 소유하며, 결과 상태를 담아 돌려줍니다.
    pub fn submit_transfer(&self, mut request: TransferRequest) -> TransferRequest {
        match self.pipe_for(request.device(), request.endpoint()) {
            Ok(pipe) => self.engine.queue_transfer(&pipe, request),
            Err(e) => {
                request.finish(Err(e));
                request
            }
        }
    }

    /// 엔드포인트 0 제어 전송
    pub fn control_msg(&self, id: DeviceId, setup: UsbControlRequest, data: &mut [u8]) -> Result<usize, UsbError> {
        let pipe = self.pipe_for(id, 0)?;
        self.engine.control(&pipe, &setup, data)
    }

    /// 디스크립터 읽기 (요청한 길이가 모두 와야 성공)
    pub fn get_descriptor(
        &self,
        id: DeviceId,
        kind: DescriptorType,
        index: u8,
        buf: &mut [u8],
    ) -> Result<usize, UsbError> {
        let length = u16::try_from(buf.len()).map_err(|_| UsbError::InvalidParameter)?;
        let setup = UsbControlRequest::new_get_descriptor(kind, index, 0, length);
        let actual = self.control_msg(id, setup, buf)?;
        if actual != buf.len() {
            crate::log_debug!("{}: short {:?} descriptor ({} of {} bytes)", id, kind, actual, buf.len());
            return Err(UsbError::InvalidData);
        }
        Ok(actual)
    }

    /// 문자열 디스크립터를 ASCII로 읽기 (디바이스의 첫 번째 언어)
    pub fn read_string(&self, id: DeviceId, index: u8) -> Result<String, UsbError> {
        let language = self.string_language(id)?;
        self.read_string_in(id, index, language)
    }

    fn string_language(&self, id: DeviceId) -> Result<u16, UsbError> {
        let mut languages = [0u8; 4];
        let setup = UsbControlRequest::new_get_descriptor(DescriptorType::String, 0, 0, languages.len() as u16);
        if self.control_msg(id, setup, &mut languages)? < languages.len() {
            return Err(UsbError::InvalidDescriptor);
        }
        Ok(u16::from_le_bytes([languages[2], languages[3]]))
    }

    fn read_string_in(&self, id: DeviceId, index: u8, language: u16) -> Result<String, UsbError> {
        let mut buf = [0u8; STRING_DESCRIPTOR_REQUEST];
        let setup = UsbControlRequest::new_get_descriptor(
            DescriptorType::String,
            index,
            language,
            STRING_DESCRIPTOR_REQUEST as u16,
        );
        let n = self.control_msg(id, setup, &mut buf)?;
        parse_string_descriptor(&buf[..n])
    }

    /// 제조사/제품 문자열 읽기. 실패해도 열거는 계속됩니다.
    pub(crate) fn read_device_strings(&self, id: DeviceId) {
        let Some(descriptor) = self.with_device(id, |d| *d.device_descriptor()) else {
            return;
        };
        let (manufacturer_index, product_index) = (descriptor.manufacturer_string, descriptor.product_string);
        if manufacturer_index == 0 && product_index == 0 {
            return;
        }

        let language = match self.string_language(id) {
            Ok(language) => language,
            Err(e) => {
                crate::log_debug!("{}: no string languages: {}", id, e);
                return;
            }
        };
        let read = |index: u8| {
            if index == 0 {
                return None;
            }
            self.read_string_in(id, index, language)
                .map_err(|e| {
                    crate::log_debug!("{}: string {} unreadable: {}", id, index, e);
                })
                .ok()
        };
        let manufacturer = read(manufacturer_index);
        let product = read(product_index);
        if let Some(product) = &product {
            crate::log_info!("{}: {}", id, product);
        }
        let _ = self.update(id, |d| d.set_strings(manufacturer, product));
    }

    pub fn set_configuration(&self, id: DeviceId, value: u8) -> Result<(), UsbError> {
        self.control_msg(id, UsbControlRequest::new_set_configuration(value), &mut [])
            .map(|_| ())
    }

    /// 포트 연결 감지: 레코드만 만들고 Connected 상태로
    pub fn connect_device(&self, parent: DeviceId, port: u8, speed: UsbSpeed) -> Result<DeviceId, UsbError> {
        let id = self.devices.lock().allocate(Some(parent), port, speed)?;
        self.update(id, |d| d.set_state(UsbDeviceState::Connected))?;
        crate::log_info!("{}: {}-speed device connected on port {}", id, speed.as_str(), port);
        Ok(id)
    }

    /// 연결 후 열거까지. 실패하면 레코드를 제거합니다.
    pub fn attach_device(&self, parent: DeviceId, port: u8, speed: UsbSpeed) -> Result<DeviceId, UsbError> {
        let id = self.connect_device(parent, port, speed)?;
        if let Err(e) = self.enumerate(id) {
            self.detach_device(id);
            return Err(e);
        }
        Ok(id)
    }

    /// 디바이스와 그 자식 제거
    pub fn detach_device(&self, id: DeviceId) {
        {
            let mut devices = self.devices.lock();
            if let Some(device) = devices.get_mut(id) {
                device.mark_detaching();
            }
        }
        self.release_default_address(id);

        let removed = self.devices.lock().remove(id);
        for mut device in removed {
            if let Some(driver) = device.take_driver() {
                crate::log_debug!("{}: unbinding {}", device.id(), driver.name());
                driver.unbind_device(device.id());
            }
            record_recovery_event(RecoveryEvent::DeviceDisconnected);
            crate::log_info!("{}: detached (address {})", device.id(), device.address());
        }
    }

    /// GET_PORT_STATUS (루트 허브 경유)
    pub fn port_status(&self, hub: DeviceId, port: u8) -> Result<(PortStatus, PortChange), UsbError> {
        let mut buf = [0u8; 4];
        let n = self.control_msg(hub, UsbControlRequest::new_get_port_status(port), &mut buf)?;
        parse_port_status(&buf[..n])
    }

    fn clear_port_feature(&self, hub: DeviceId, port: u8, feature: PortFeature) -> Result<(), UsbError> {
        self.control_msg(hub, UsbControlRequest::new_clear_port_feature(port, feature), &mut [])
            .map(|_| ())
    }

    /// 포트 변경 처리 (작업자 태스크 본문)
    ///
    /// 처리할 신호가 없으면 `Ok(false)`. 새 디바이스의 열거 실패는 로그만 남깁니다.
    pub fn process_port_events(&self) -> Result<bool, UsbError> {
        if !self.port_events.take_signal() {
            return Ok(false);
        }
        let root = self.root_hub().ok_or(UsbError::NotInitialized)?;
        let (status, change) = self.port_status(root, ROOT_PORT)?;
        crate::log_debug!("Root port status {:?} change {:?}", status, change);

        if change.contains(PortChange::CONNECTION) {
            self.clear_port_feature(root, ROOT_PORT, PortFeature::ConnectionChange)?;

            let previous = self.devices.lock().child_on_port(root, ROOT_PORT);
            if let Some(old) = previous {
                self.detach_device(old);
            }

            if status.contains(PortStatus::CONNECTION) {
                self.handle_connect(root)?;
            } else {
                crate::log_info!("Device disconnected from root port");
            }
        }

        if change.contains(PortChange::ENABLE) {
            self.clear_port_feature(root, ROOT_PORT, PortFeature::EnableChange)?;
        }
        if change.contains(PortChange::OVER_CURRENT) {
            crate::log_warn!("Over-current on root port");
            self.clear_port_feature(root, ROOT_PORT, PortFeature::OverCurrentChange)?;
        }
        Ok(true)
    }

    fn handle_connect(&self, root: DeviceId) -> Result<(), UsbError> {
        self.control_msg(root, UsbControlRequest::new_set_port_feature(ROOT_PORT, PortFeature::Reset), &mut [])?;
        let (status, change) = self.port_status(root, ROOT_PORT)?;
        if change.contains(PortChange::RESET) {
            self.clear_port_feature(root, ROOT_PORT, PortFeature::ResetChange)?;
        }
        if !status.contains(PortStatus::ENABLE) {
            crate::log_warn!("Root port did not enable after reset");
            return Ok(());
        }

        match self.attach_device(root, ROOT_PORT, status.speed()) {
            Ok(id) => {
                crate::log_info!("{}: enumerated", id);
            }
            Err(e) => {
                crate::log_warn!("Device on root port failed to enumerate: {}", e);
            }
        }
        Ok(())
    }

    /// 디바이스 트리 출력 (usbinfo)
    pub fn write_info<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(
            out,
            "{} ({}), {} of {} channels free",
            self.controller.controller_type().as_str(),
            if self.controller.is_running() { "running" } else { "stopped" },
            self.channels().free_count(),
            self.channels().count()
        )?;
        self.devices.lock().write_info(out)
    }

    /// 로그로 디바이스 트리 출력
    pub fn dump_info(&self) {
        let mut out = String::new();
        if self.write_info(&mut out).is_ok() {
            for line in out.lines() {
                crate::log_info!("{}", line);
            }
        }
    }

    /// 컨트롤러 정지
    pub fn shutdown(&self) {
        self.controller.stop();
    }

    /// `length` 바이트 디스크립터 블록 읽기
    pub(crate) fn read_descriptor_block(
        &self,
        id: DeviceId,
        kind: DescriptorType,
        length: usize,
    ) -> Result<Vec<u8>, UsbError> {
        let mut buffer = alloc::vec![0u8; length];
        self.get_descriptor(id, kind, 0, &mut buffer)?;
        Ok(buffer)
    }
}
