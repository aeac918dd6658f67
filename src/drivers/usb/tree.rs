//! USB 디바이스 트리
//!
//! 루트 허브와 그 아래 직접 연결된 자식들을 고정 크기 아레나로 관리합니다.
//! 부모 참조는 인덱스이므로, 디바이스가 제거되어도 댕글링 참조가 생기지 않고
//! 수명 관리에는 쓰이지 않습니다. 허브 아래 허브(다단 구성)는 지원하지 않습니다.

use alloc::vec::Vec;
use core::fmt;

use crate::drivers::usb::device::{DeviceId, UsbDevice, UsbSpeed};
use crate::drivers::usb::error::UsbError;

/// 동시에 관리하는 최대 디바이스 수
pub const MAX_DEVICES: usize = 32;

pub struct DeviceTree {
    slots: Vec<Option<UsbDevice>>,
    /// 슬롯별 마지막 할당 세대
    generations: Vec<u32>,
}

impl DeviceTree {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_DEVICES).map(|_| None).collect(),
            generations: alloc::vec![0; MAX_DEVICES],
        }
    }

    /// 빈 슬롯에 디바이스 레코드 생성
    ///
    /// 부모가 없으면 루트 허브이며 하나만 존재할 수 있습니다.
    /// 부모는 반드시 루트 허브여야 합니다.
    pub fn allocate(
        &mut self,
        parent: Option<DeviceId>,
        port: u8,
        speed: UsbSpeed,
    ) -> Result<DeviceId, UsbError> {
        match parent {
            None if self.root().is_some() => return Err(UsbError::InvalidParameter),
            None => {}
            Some(parent) => {
                let parent_dev = self.get(parent).ok_or(UsbError::DeviceNotFound)?;
                if !parent_dev.is_root_hub() {
                    return Err(UsbError::UnsupportedTopology);
                }
            }
        }

        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(UsbError::DeviceLimitReached)?;
        let generation = self.generations[index].wrapping_add(1);
        self.generations[index] = generation;
        let id = DeviceId::new(index, generation);
        self.slots[index] = Some(UsbDevice::new(id, parent, port, speed));
        Ok(id)
    }

    /// 디바이스에 할당할 USB 주소 (슬롯 번호 + 1)
    pub fn address_for(id: DeviceId) -> u8 {
        (id.index() + 1) as u8
    }

    /// 디바이스와 그 자식 제거
    ///
    /// 제거된 레코드를 자식부터 돌려줍니다.
    pub fn remove(&mut self, id: DeviceId) -> Vec<UsbDevice> {
        let mut removed = Vec::new();
        for child in self.children(id) {
            removed.extend(self.remove(child));
        }
        if self.get(id).is_some() {
            if let Some(device) = self.slots[id.index()].take() {
                removed.push(device);
            }
        }
        removed
    }

    /// 같은 세대의 레코드만 돌려줌
    pub fn get(&self, id: DeviceId) -> Option<&UsbDevice> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .filter(|device| device.id() == id)
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut UsbDevice> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .filter(|device| device.id() == id)
    }

    pub fn root(&self) -> Option<DeviceId> {
        self.iter().find(|d| d.is_root_hub()).map(UsbDevice::id)
    }

    pub fn parent(&self, id: DeviceId) -> Option<DeviceId> {
        self.get(id).and_then(UsbDevice::parent)
    }

    pub fn children(&self, id: DeviceId) -> Vec<DeviceId> {
        self.iter()
            .filter(|d| d.parent() == Some(id))
            .map(UsbDevice::id)
            .collect()
    }

    pub fn child_on_port(&self, parent: DeviceId, port: u8) -> Option<DeviceId> {
        self.iter()
            .find(|d| d.parent() == Some(parent) && d.port() == port)
            .map(UsbDevice::id)
    }

    /// 루트로부터의 깊이 (루트 = 0)
    pub fn depth(&self, id: DeviceId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(parent) = current {
            depth += 1;
            current = self.parent(parent);
        }
        depth
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &UsbDevice> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// 트리 출력 (usbinfo)
    pub fn write_info<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        if let Some(root) = self.root() {
            self.write_subtree(out, root)?;
        }
        Ok(())
    }

    fn write_subtree<W: fmt::Write>(&self, out: &mut W, id: DeviceId) -> fmt::Result {
        let Some(device) = self.get(id) else {
            return Ok(());
        };
        let descriptor = device.device_descriptor();
        for _ in 0..self.depth(id) {
            out.write_str("  ")?;
        }
        write!(
            out,
            "[{}] addr={} port={} speed={} state={} class={:?} id={:04x}:{:04x}",
            id,
            device.address(),
            device.port(),
            device.speed().as_str(),
            device.state().as_str(),
            device.class_code(),
            descriptor.vendor_id,
            descriptor.product_id
        )?;
        if let Some(manufacturer) = device.manufacturer() {
            write!(out, " manufacturer=\"{}\"", manufacturer)?;
        }
        if let Some(product) = device.product() {
            write!(out, " product=\"{}\"", product)?;
        }
        if let Some(driver) = device.driver() {
            write!(out, " driver={}", driver.name())?;
        }
        writeln!(out)?;
        for child in self.children(id) {
            self.write_subtree(out, child)?;
        }
        Ok(())
    }
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}
