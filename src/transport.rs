use std::sync::{Arc, Mutex};

use embedded_hal::spi::{Error as _, ErrorKind, SpiDevice};

/// 逻辑读卡器角色（入口 / 出口）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReaderRole {
    In,
    Out,
}

impl ReaderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReaderRole::In => "IN",
            ReaderRole::Out => "OUT",
        }
    }
}

/// 总线层错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("SPI transfer failed: {0:?}")]
    Transfer(ErrorKind),
    #[error("SPI bus lock poisoned")]
    Poisoned,
}

/// 寄存器级访问接口：一次调用对应一次 16 位交换。
pub trait RegisterBus: Send + Sync {
    fn write_register(&self, role: ReaderRole, addr: u8, value: u8) -> Result<(), BusError>;
    fn read_register(&self, role: ReaderRole, addr: u8) -> Result<u8, BusError>;
}

/// 写操作地址字节：bit7=0，地址左移一位。
pub fn write_address(addr: u8) -> u8 {
    (addr << 1) & 0x7E
}

/// 读操作地址字节：bit7=1。
pub fn read_address(addr: u8) -> u8 {
    0x80 | ((addr << 1) & 0x7E)
}

/// 两片 RC522 共用的 SPI 总线。
///
/// 片选由各自的 `SpiDevice` 在一次 transfer 期间拉低；
/// 互斥锁只包住单次寄存器交换，不跨协议步骤持有。
pub struct SpiRegisterBus<D> {
    devices: Mutex<ReaderDevices<D>>,
}

struct ReaderDevices<D> {
    entry: D,
    exit: D,
}

impl<D: SpiDevice> SpiRegisterBus<D> {
    pub fn new(entry: D, exit: D) -> Self {
        Self {
            devices: Mutex::new(ReaderDevices { entry, exit }),
        }
    }

    fn exchange(&self, role: ReaderRole, frame: &mut [u8; 2]) -> Result<(), BusError> {
        let mut devices = self.devices.lock().map_err(|_| BusError::Poisoned)?;
        let device = match role {
            ReaderRole::In => &mut devices.entry,
            ReaderRole::Out => &mut devices.exit,
        };
        device
            .transfer_in_place(frame)
            .map_err(|err| BusError::Transfer(err.kind()))
    }
}

impl<D: SpiDevice + Send> RegisterBus for SpiRegisterBus<D> {
    fn write_register(&self, role: ReaderRole, addr: u8, value: u8) -> Result<(), BusError> {
        let mut frame = [write_address(addr), value];
        self.exchange(role, &mut frame)
    }

    fn read_register(&self, role: ReaderRole, addr: u8) -> Result<u8, BusError> {
        let mut frame = [read_address(addr), 0x00];
        self.exchange(role, &mut frame)?;
        Ok(frame[1])
    }
}

/// 单个物理读卡器句柄：角色 + 共享总线引用。
pub struct ReaderHandle<B> {
    role: ReaderRole,
    bus: Arc<B>,
}

impl<B> Clone for ReaderHandle<B> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            bus: self.bus.clone(),
        }
    }
}

impl<B: RegisterBus> ReaderHandle<B> {
    pub fn new(role: ReaderRole, bus: Arc<B>) -> Self {
        Self { role, bus }
    }

    pub fn role(&self) -> ReaderRole {
        self.role
    }

    pub fn write(&self, addr: u8, value: u8) -> Result<(), BusError> {
        self.bus.write_register(self.role, addr, value)
    }

    pub fn read(&self, addr: u8) -> Result<u8, BusError> {
        self.bus.read_register(self.role, addr)
    }

    /// 读-改-写：置位。
    pub fn set_bits(&self, addr: u8, mask: u8) -> Result<(), BusError> {
        let current = self.read(addr)?;
        self.write(addr, current | mask)
    }

    /// 读-改-写：清位。
    pub fn clear_bits(&self, addr: u8, mask: u8) -> Result<(), BusError> {
        let current = self.read(addr)?;
        self.write(addr, current & !mask)
    }
}
