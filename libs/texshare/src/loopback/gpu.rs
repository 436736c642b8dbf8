// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::kernel::KernelObject;
use super::{LoopbackKeyedMutex, LoopbackProcess, LoopbackSemaphore};
use crate::core::descriptor::round_up;
use crate::core::{
    ExportableImage, ExportedHandle, GpuInterop, HandleKind, OsHandle, Result, ShareError,
    SharedImageDescriptor, Timeout, WaitOutcome,
};

/// How long a consumer queue waits for the producer's initial transition.
const TRANSITION_WAIT: Timeout = Timeout::Bounded(std::time::Duration::from_secs(5));

/// How a simulated driver reports the memory an image needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeModel {
    /// Explicit-memory API: nominal size rounded to 64 KiB pages.
    Explicit,
    /// Driver-managed API: nominal size plus compression metadata and a
    /// header, rounded to 4 KiB.
    Implicit,
    /// Fixed requirement regardless of shape.
    Fixed(u64),
}

impl SizeModel {
    pub fn required(self, desc: &SharedImageDescriptor) -> u64 {
        let nominal = desc.nominal_size();
        match self {
            SizeModel::Explicit => round_up(nominal, 64 * 1024),
            SizeModel::Implicit => round_up(nominal + nominal / 8 + 4096, 4096),
            SizeModel::Fixed(size) => size,
        }
    }
}

/// Backing store of one exportable allocation.
#[derive(Debug)]
pub(crate) struct MemoryObject {
    bytes: Mutex<Vec<u8>>,
    kind: HandleKind,
    mutex: LoopbackKeyedMutex,
    transitioned: AtomicBool,
}

/// An image bound to a memory object, allocated here or imported.
#[derive(Debug, Clone)]
pub struct LoopbackImage {
    memory: Arc<MemoryObject>,
    descriptor: SharedImageDescriptor,
    size: u64,
    imported: bool,
}

impl LoopbackImage {
    pub fn descriptor(&self) -> &SharedImageDescriptor {
        &self.descriptor
    }

    /// Size of the memory as this side sees it.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_imported(&self) -> bool {
        self.imported
    }

    /// Whether the producer's initial layout transition has run.
    pub fn is_transitioned(&self) -> bool {
        self.memory.transitioned.load(Ordering::Acquire)
    }

    /// True when both images are bound to the same physical memory.
    pub fn shares_memory_with(&self, other: &LoopbackImage) -> bool {
        Arc::ptr_eq(&self.memory, &other.memory)
    }

    /// Overwrites the pixel region with `value`, `chunk` bytes at a time and
    /// yielding in between, so an unsynchronized reader would see a torn
    /// frame.
    pub fn fill(&self, value: u8, chunk: usize) {
        let len = self.pixel_len();
        let chunk = chunk.max(1);
        let mut offset = 0;
        while offset < len {
            let end = (offset + chunk).min(len);
            self.memory.bytes.lock()[offset..end].fill(value);
            offset = end;
            std::thread::yield_now();
        }
    }

    /// Copy of the pixel region.
    pub fn snapshot(&self) -> Vec<u8> {
        let len = self.pixel_len();
        self.memory.bytes.lock()[..len].to_vec()
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut bytes = self.memory.bytes.lock();
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                ShareError::Gpu(format!(
                    "write of {} bytes at {offset} out of bounds",
                    data.len()
                ))
            })?;
        bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let bytes = self.memory.bytes.lock();
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                ShareError::Gpu(format!("read of {len} bytes at {offset} out of bounds"))
            })?;
        Ok(bytes[offset..end].to_vec())
    }

    fn pixel_len(&self) -> usize {
        let nominal = usize::try_from(self.descriptor.nominal_size()).unwrap_or(usize::MAX);
        nominal.min(self.memory.bytes.lock().len())
    }
}

/// Simulated GPU device living in one [`LoopbackProcess`].
#[derive(Debug, Clone)]
pub struct LoopbackGpu {
    process: LoopbackProcess,
    size_model: SizeModel,
    exportable: Vec<HandleKind>,
}

impl LoopbackGpu {
    /// A device whose memory can be exported as every handle kind.
    pub fn new(process: &LoopbackProcess, size_model: SizeModel) -> Self {
        Self {
            process: process.clone(),
            size_model,
            exportable: vec![
                HandleKind::OpaqueWin32,
                HandleKind::D3D11Texture,
                HandleKind::OpaqueFd,
            ],
        }
    }

    /// Restricts which handle kinds have an exportable memory type.
    pub fn with_exportable_kinds(mut self, kinds: &[HandleKind]) -> Self {
        self.exportable = kinds.to_vec();
        self
    }

    pub fn process(&self) -> &LoopbackProcess {
        &self.process
    }

    pub fn size_model(&self) -> SizeModel {
        self.size_model
    }

    fn closer(&self) -> impl FnOnce(OsHandle) + Send + 'static {
        let process = self.process.clone();
        move |handle| {
            process.close(handle);
        }
    }
}

impl GpuInterop for LoopbackGpu {
    type Image = LoopbackImage;
    type Mutex = LoopbackKeyedMutex;
    type Semaphore = LoopbackSemaphore;

    fn backend_name(&self) -> &'static str {
        match self.size_model {
            SizeModel::Implicit => "loopback (driver-managed)",
            _ => "loopback (explicit)",
        }
    }

    fn query_required_size(&self, desc: &SharedImageDescriptor) -> Result<u64> {
        Ok(self.size_model.required(desc))
    }

    fn allocate_exportable(
        &self,
        desc: &SharedImageDescriptor,
        kind: HandleKind,
    ) -> Result<ExportableImage<LoopbackImage>> {
        if !self.exportable.contains(&kind) {
            return Err(ShareError::Configuration(format!(
                "no memory type exportable as {kind:?}"
            )));
        }
        let required_size = self.query_required_size(desc)?;
        let len = usize::try_from(required_size)
            .map_err(|_| ShareError::Gpu(format!("allocation of {required_size} bytes")))?;

        let memory = Arc::new(MemoryObject {
            bytes: Mutex::new(vec![0; len]),
            kind,
            mutex: LoopbackKeyedMutex::new(),
            transitioned: AtomicBool::new(false),
        });
        Ok(ExportableImage {
            image: LoopbackImage {
                memory,
                descriptor: *desc,
                size: required_size,
                imported: false,
            },
            required_size,
        })
    }

    fn export_memory(&self, image: &LoopbackImage, kind: HandleKind) -> Result<ExportedHandle> {
        if image.imported {
            return Err(ShareError::Gpu("imported memory cannot be re-exported".into()));
        }
        if image.memory.kind != kind {
            return Err(ShareError::Gpu(format!(
                "memory was allocated exportable as {:?}, not {kind:?}",
                image.memory.kind
            )));
        }
        let handle = self
            .process
            .insert(KernelObject::Memory(image.memory.clone()));
        Ok(ExportedHandle::new(handle, kind).with_release(self.closer()))
    }

    fn import_memory(
        &self,
        handle: OsHandle,
        kind: HandleKind,
        size: u64,
        desc: &SharedImageDescriptor,
    ) -> Result<LoopbackImage> {
        let object = self.process.resolve(handle)?;
        // The handle is consumed whether or not the import succeeds.
        self.process.close(handle);

        let KernelObject::Memory(memory) = object else {
            return Err(ShareError::Gpu(format!("handle {handle} is not a memory object")));
        };
        if memory.kind != kind {
            return Err(ShareError::Gpu(format!(
                "handle {handle} is {:?}, import requested {kind:?}",
                memory.kind
            )));
        }
        let required = self.query_required_size(desc)?;
        if size < required {
            return Err(ShareError::Gpu(format!(
                "imported size {size} cannot back an image that needs {required}"
            )));
        }

        Ok(LoopbackImage {
            memory,
            descriptor: *desc,
            size,
            imported: true,
        })
    }

    fn keyed_mutex(&self, image: &LoopbackImage) -> Result<LoopbackKeyedMutex> {
        Ok(image.memory.mutex.clone())
    }

    fn create_view(&self, image: &LoopbackImage) -> Result<()> {
        if !image.memory.mutex.is_held() {
            return Err(ShareError::Protocol(
                "view over shared memory created without holding key 0".into(),
            ));
        }
        Ok(())
    }

    fn create_exportable_semaphore(&self, kind: HandleKind) -> Result<LoopbackSemaphore> {
        if !self.exportable.contains(&kind) {
            return Err(ShareError::Configuration(format!(
                "semaphores cannot be exported as {kind:?}"
            )));
        }
        Ok(LoopbackSemaphore::new())
    }

    fn export_semaphore(
        &self,
        semaphore: &LoopbackSemaphore,
        kind: HandleKind,
    ) -> Result<ExportedHandle> {
        let handle = self
            .process
            .insert(KernelObject::Semaphore(semaphore.clone()));
        Ok(ExportedHandle::new(handle, kind).with_release(self.closer()))
    }

    fn import_semaphore(&self, handle: OsHandle, _kind: HandleKind) -> Result<LoopbackSemaphore> {
        let object = self.process.resolve(handle)?;
        self.process.close(handle);
        match object {
            KernelObject::Semaphore(semaphore) => Ok(semaphore),
            KernelObject::Memory(_) => Err(ShareError::Gpu(format!(
                "handle {handle} is not a semaphore"
            ))),
        }
    }

    fn signal_initial_transition(
        &self,
        image: &LoopbackImage,
        semaphore: &LoopbackSemaphore,
    ) -> Result<()> {
        image.memory.transitioned.store(true, Ordering::Release);
        semaphore.signal();
        Ok(())
    }

    fn wait_initial_transition(
        &self,
        image: &LoopbackImage,
        semaphore: &LoopbackSemaphore,
    ) -> Result<()> {
        match semaphore.wait(TRANSITION_WAIT) {
            WaitOutcome::Signaled if image.is_transitioned() => Ok(()),
            WaitOutcome::Signaled => Err(ShareError::Gpu(
                "semaphore signalled before the layout transition".into(),
            )),
            WaitOutcome::TimedOut => Err(ShareError::Gpu(
                "initial transition semaphore was never signalled".into(),
            )),
        }
    }
}
