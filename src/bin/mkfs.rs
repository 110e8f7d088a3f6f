//! A host-side image formatter: a small `std` binary that builds a flat
//! disk image and formats it, for use as test fixtures or as input to a
//! real kernel's block device. It drives the library's own
//! [`clockfs::fs::Filesystem::format`] against a file-backed
//! [`clockfs::device::BlockDevice`] and [`clockfs::alloc_map::SectorAllocator`]
//! rather than hand-assembling inode/directory bytes itself, so the real
//! formatting logic lives in one place.

use std::env;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use clockfs::alloc_map::SectorAllocator;
use clockfs::device::BlockDevice;
use clockfs::fs::Filesystem;
use clockfs::param::SECTOR_SIZE;

const DEFAULT_SECTORS: u32 = 1024;
/// Sector 0 is reserved as a boot sector this crate does not otherwise
/// use; formatting allocates the root directory right after it.
const RESERVED_SECTORS: u32 = 1;

struct FileDevice {
    file: Mutex<std::fs::File>,
    sectors: u32,
}

impl FileDevice {
    fn create(path: &str, sectors: u32) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(u64::from(sectors) * SECTOR_SIZE as u64)?;
        Ok(Self { file: Mutex::new(file), sectors })
    }
}

impl BlockDevice for FileDevice {
    fn read(&self, sector: u32, buf: &mut [u8]) {
        let mut file = self.file.lock().expect("image file lock");
        file.seek(SeekFrom::Start(u64::from(sector) * SECTOR_SIZE as u64))
            .expect("seek to sector");
        file.read_exact(buf).expect("read sector");
    }

    fn write(&self, sector: u32, buf: &[u8]) {
        let mut file = self.file.lock().expect("image file lock");
        file.seek(SeekFrom::Start(u64::from(sector) * SECTOR_SIZE as u64))
            .expect("seek to sector");
        file.write_all(buf).expect("write sector");
    }

    fn size(&self) -> u32 {
        self.sectors
    }
}

/// A plain `Vec<bool>` free-sector bitmap — just enough of a free-map
/// implementation to format an image with.
struct FreeMapAllocator {
    free: Mutex<Vec<bool>>,
}

impl FreeMapAllocator {
    fn new(sectors: u32, reserved: u32) -> Self {
        let mut free = vec![true; sectors as usize];
        for slot in free.iter_mut().take(reserved as usize) {
            *slot = false;
        }
        Self { free: Mutex::new(free) }
    }
}

impl SectorAllocator for FreeMapAllocator {
    fn alloc(&self, n: usize) -> Option<Vec<u32>> {
        let mut free = self.free.lock().expect("free-map lock");
        if free.iter().filter(|&&f| f).count() < n {
            return None;
        }
        let mut out = Vec::with_capacity(n);
        for (i, slot) in free.iter_mut().enumerate() {
            if out.len() == n {
                break;
            }
            if *slot {
                *slot = false;
                out.push(i as u32);
            }
        }
        Some(out)
    }

    fn release(&self, sector: u32) {
        self.free.lock().expect("free-map lock")[sector as usize] = true;
    }
}

fn main() {
    let mut args = env::args().skip(1);
    let path = match args.next() {
        Some(p) => p,
        None => {
            eprintln!("usage: mkfs <image-path> [sectors]");
            std::process::exit(1);
        }
    };
    let sectors = args.next().and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_SECTORS);

    let device = FileDevice::create(&path, sectors).expect("create image file");
    let allocator = FreeMapAllocator::new(sectors, RESERVED_SECTORS);
    let fs = Filesystem::format(device, allocator).expect("format filesystem");
    println!("formatted {} ({} sectors), root directory at sector {}", path, sectors, fs.root_sector());
    fs.shutdown();
}
