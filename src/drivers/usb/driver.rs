//! USB 디바이스 드라이버 등록
//!
//! 열거가 끝난 디바이스마다 등록 순서대로 드라이버에 맡을지 묻고, 처음 받아들인
//! 드라이버를 디바이스에 묶습니다. 디바이스가 분리되면 묶인 드라이버에 알립니다.
//! 드라이버를 나중에 등록해도 아직 드라이버가 없는 구성 완료 디바이스에 다시 묻습니다.

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::drivers::mmio::RegisterBlock;
use crate::drivers::platform::Platform;
use crate::drivers::usb::core::UsbSubsystem;
use crate::drivers::usb::descriptor::{ConfigurationInfo, DeviceDescriptor};
use crate::drivers::usb::device::{DeviceId, UsbDevice, UsbDeviceState};
use crate::drivers::usb::error::UsbError;

/// 등록할 수 있는 최대 드라이버 수
pub const MAX_DEVICE_DRIVERS: usize = 16;

/// 클래스/벤더 드라이버
pub trait UsbDeviceDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// 디바이스를 맡을지 결정
    ///
    /// 맡지 않으면 `Err(UsbError::DeviceUnsupported)`를 돌려주며, 다음 드라이버에
    /// 차례가 넘어갑니다. 다른 에러는 디바이스 열거 실패로 이어집니다.
    fn bind_device(
        &self,
        id: DeviceId,
        descriptor: &DeviceDescriptor,
        configuration: &ConfigurationInfo,
    ) -> Result<(), UsbError>;

    /// 묶인 디바이스가 분리됨
    fn unbind_device(&self, id: DeviceId) {
        let _ = id;
    }
}

/// 등록된 드라이버 목록
pub struct DriverRegistry {
    drivers: Mutex<Vec<Arc<dyn UsbDeviceDriver>>>,
}

impl DriverRegistry {
    pub const fn new() -> Self {
        Self {
            drivers: Mutex::new(Vec::new()),
        }
    }

    /// 드라이버 추가. 이미 등록된 드라이버면 `Ok(false)`
    pub fn register(&self, driver: Arc<dyn UsbDeviceDriver>) -> Result<bool, UsbError> {
        let mut drivers = self.drivers.lock();
        if drivers.iter().any(|known| Arc::ptr_eq(known, &driver)) {
            return Ok(false);
        }
        if drivers.len() >= MAX_DEVICE_DRIVERS {
            crate::log_error!("Too many USB device drivers, {} not registered", driver.name());
            return Err(UsbError::DeviceLimitReached);
        }
        drivers.push(driver);
        Ok(true)
    }

    /// 잠금 밖에서 호출하기 위한 복사본
    pub fn snapshot(&self) -> Vec<Arc<dyn UsbDeviceDriver>> {
        self.drivers.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.drivers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RegisterBlock + 'static, P: Platform + 'static> UsbSubsystem<R, P> {
    /// 드라이버 등록 후 드라이버 없는 구성 완료 디바이스에 연결 시도
    pub fn register_device_driver(&self, driver: Arc<dyn UsbDeviceDriver>) -> Result<(), UsbError> {
        if !self.drivers.register(driver.clone())? {
            return Ok(());
        }
        crate::log_info!("Registered USB device driver {}", driver.name());

        let unbound: Vec<DeviceId> = self
            .devices
            .lock()
            .iter()
            .filter(|d| d.state() == UsbDeviceState::Configured && d.driver().is_none())
            .map(UsbDevice::id)
            .collect();
        for id in unbound {
            match self.try_to_bind_device_driver(id) {
                Ok(()) | Err(UsbError::DeviceUnsupported) => {}
                Err(e) => {
                    crate::log_warn!("{}: driver binding failed: {}", id, e);
                }
            }
        }
        Ok(())
    }

    /// 등록 순서대로 드라이버에 물어 첫 번째로 받아들인 드라이버를 묶음
    ///
    /// 이미 드라이버가 있으면 아무것도 하지 않습니다. 맡는 드라이버가 없으면
    /// `Err(UsbError::DeviceUnsupported)`.
    pub fn try_to_bind_device_driver(&self, id: DeviceId) -> Result<(), UsbError> {
        let (descriptor, configuration) = {
            let devices = self.devices.lock();
            let device = devices.get(id).ok_or(UsbError::DeviceNotFound)?;
            if device.driver().is_some() {
                return Ok(());
            }
            let configuration = device
                .configuration()
                .cloned()
                .ok_or(UsbError::DeviceUnsupported)?;
            (*device.device_descriptor(), configuration)
        };

        for driver in self.drivers.snapshot() {
            match driver.bind_device(id, &descriptor, &configuration) {
                Ok(()) => return self.attach_driver(id, driver),
                Err(UsbError::DeviceUnsupported) => continue,
                Err(e) => {
                    crate::log_warn!("{}: driver {} rejected the device: {}", id, driver.name(), e);
                    return Err(e);
                }
            }
        }
        Err(UsbError::DeviceUnsupported)
    }

    /// 바인딩 사이에 다른 쪽이 먼저 묶었거나 디바이스가 분리됐으면 되돌림
    fn attach_driver(&self, id: DeviceId, driver: Arc<dyn UsbDeviceDriver>) -> Result<(), UsbError> {
        let attached = self.update(id, |d| {
            if d.driver().is_some() {
                return false;
            }
            d.set_driver(driver.clone());
            true
        });
        match attached {
            Ok(true) => {
                crate::log_info!("{}: bound to {}", id, driver.name());
                Ok(())
            }
            Ok(false) => {
                driver.unbind_device(id);
                Ok(())
            }
            Err(e) => {
                driver.unbind_device(id);
                Err(e)
            }
        }
    }

    pub fn device_driver_count(&self) -> usize {
        self.drivers.len()
    }
}
