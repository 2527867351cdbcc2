use crate::error::{ReconError, Result};
use std::fmt;
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Number of compute devices visible to the process. Kernels run on the host thread pool, which
/// is exposed as a single device.
pub fn get_device_count() -> usize {
    1
}

pub fn get_device_name(device_index: usize) -> Result<String> {
    if device_index >= get_device_count() {
        return Err(ReconError::Configuration(format!("no device with index {device_index}")));
    }
    Ok(format!("host:{} threads", rayon::current_num_threads()))
}

struct MemoryPool {
    total: usize,
    used: AtomicUsize,
}

impl MemoryPool {
    fn free(&self) -> usize {
        self.total.saturating_sub(self.used.load(Ordering::Acquire))
    }

    fn claim(&self, bytes: usize) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&u| u <= self.total)
            })
            .is_ok()
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Handle to a compute device. Clones share the same memory accounting, so every engine bound to
/// the same device draws from one budget.
#[derive(Clone)]
pub struct Device {
    index: usize,
    pool: Arc<MemoryPool>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (free, total) = self.memory_info();
        f.debug_struct("Device").field("index", &self.index).field("free", &free).field("total", &total).finish()
    }
}

impl Device {
    /// selects a device by index with an unbounded memory budget
    pub fn select(device_index: usize) -> Result<Self> {
        Self::with_memory_limit(device_index, usize::MAX)
    }

    /// selects a device and caps the number of bytes that may be allocated on it
    pub fn with_memory_limit(device_index: usize, total_bytes: usize) -> Result<Self> {
        let name = get_device_name(device_index)?;
        debug!(device_index, %name, "device selected");
        Ok(Self {
            index: device_index,
            pool: Arc::new(MemoryPool { total: total_bytes, used: AtomicUsize::new(0) }),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// returns current device memory info in bytes (free_mem, total_mem)
    pub fn memory_info(&self) -> (usize, usize) {
        (self.pool.free(), self.pool.total)
    }

    /// Allocates memory for some number of elements, setting all entries to zero
    pub fn alloc_zeroed<T>(&self, n_elements: usize) -> Result<DeviceArray<T>>
    where
        T: Copy + Default + Send + Sync,
    {
        let data_bytes = n_elements * size_of::<T>();
        if !self.pool.claim(data_bytes) {
            let (free_mem, _) = self.memory_info();
            warn!(
                "requested allocation ({:.3e} bytes) exceeds free device memory ({:.3e} bytes)",
                data_bytes as f64, free_mem as f64
            );
            return Err(ReconError::Resource(format!(
                "device {} cannot allocate {data_bytes} bytes ({free_mem} bytes free)",
                self.index
            )));
        }
        let mut data = Vec::new();
        if let Err(e) = data.try_reserve_exact(n_elements) {
            self.pool.release(data_bytes);
            return Err(ReconError::Resource(format!("allocation of {data_bytes} bytes failed: {e}")));
        }
        data.resize(n_elements, T::default());
        Ok(DeviceArray { data, bytes: data_bytes, pool: Arc::clone(&self.pool) })
    }

    /// Allocates memory on the device and copies `data` into it
    pub fn upload<T>(&self, data: &[T]) -> Result<DeviceArray<T>>
    where
        T: Copy + Default + Send + Sync,
    {
        let mut device_array = self.alloc_zeroed(data.len())?;
        device_array.as_mut_slice().copy_from_slice(data);
        Ok(device_array)
    }
}

/// Single-owner device memory. The allocation is returned to the device when the array is dropped.
pub struct DeviceArray<T> {
    data: Vec<T>,
    bytes: usize,
    pool: Arc<MemoryPool>,
}

impl<T: Copy + Default + Send + Sync> DeviceArray<T> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// copies host data into this array. Lengths must agree.
    pub fn copy_from_host(&mut self, host: &[T]) -> Result<()> {
        if host.len() != self.data.len() {
            return Err(ReconError::Data(format!(
                "host buffer has {} elements, device array has {}",
                host.len(),
                self.data.len()
            )));
        }
        self.data.copy_from_slice(host);
        Ok(())
    }

    /// copies this array back into a host buffer. Lengths must agree.
    pub fn copy_to_host(&self, host: &mut [T]) -> Result<()> {
        if host.len() != self.data.len() {
            return Err(ReconError::Data(format!(
                "host buffer has {} elements, device array has {}",
                host.len(),
                self.data.len()
            )));
        }
        host.copy_from_slice(&self.data);
        Ok(())
    }

    pub fn to_host_vec(&self) -> Vec<T> {
        self.data.clone()
    }
}

impl<T> Drop for DeviceArray<T> {
    fn drop(&mut self) {
        self.pool.release(self.bytes);
    }
}

impl<T> fmt::Debug for DeviceArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray").field("len", &self.data.len()).field("bytes", &self.bytes).finish()
    }
}
