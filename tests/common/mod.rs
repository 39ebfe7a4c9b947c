//! Fixture builders shared by the integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, EntryType, Header};

use pixkit::dataset::ArchiveFetcher;
use pixkit::{KitError, KitResult};

pub const RECORD_BYTES: usize = 3 * 32 * 32;
pub const TOP_DIR: &str = "cifar-10-batches-py";

/// Deterministic channel-planar pixels for `count` records
pub fn synthetic_pixels(count: usize) -> Vec<u8> {
    (0..count * RECORD_BYTES)
        .map(|i| ((i * 13 + i / RECORD_BYTES * 7) % 251) as u8)
        .collect()
}

fn short_binstring(buffer: &mut Vec<u8>, value: &[u8]) {
    assert!(value.len() < 256);
    buffer.push(b'U');
    buffer.push(value.len() as u8);
    buffer.extend_from_slice(value);
}

fn binint(buffer: &mut Vec<u8>, value: i32) {
    buffer.push(b'J');
    buffer.write_i32::<LittleEndian>(value).unwrap();
}

/// numpy uint8 array of shape (rows, cols), pickled the way Python 2 numpy does
fn ndarray(buffer: &mut Vec<u8>, pixels: &[u8], rows: i32, cols: i32) {
    buffer.extend_from_slice(b"cnumpy.core.multiarray\n_reconstruct\nq\x02");
    buffer.extend_from_slice(b"cnumpy\nndarray\nq\x03");
    buffer.extend_from_slice(&[b'K', 0, 0x85]);
    short_binstring(buffer, b"b");
    buffer.extend_from_slice(&[0x87, b'R', b'q', 0x04]);

    // state: (1, (rows, cols), dtype('u1'), False, raw)
    buffer.extend_from_slice(&[b'(', b'K', 1]);
    binint(buffer, rows);
    binint(buffer, cols);
    buffer.push(0x86);
    buffer.extend_from_slice(b"cnumpy\ndtype\nq\x05");
    short_binstring(buffer, b"u1");
    buffer.extend_from_slice(&[b'K', 0, b'K', 1, 0x87, b'R']);
    buffer.extend_from_slice(&[b'(', b'K', 3]);
    short_binstring(buffer, b"|");
    buffer.extend_from_slice(&[b'N', b'N', b'N']);
    binint(buffer, -1);
    binint(buffer, -1);
    buffer.extend_from_slice(&[b'K', 0, b't', b'b']);
    buffer.push(0x89);
    buffer.push(b'T');
    buffer.write_i32::<LittleEndian>(pixels.len() as i32).unwrap();
    buffer.extend_from_slice(pixels);
    buffer.extend_from_slice(&[b'q', 0x06, b't', b'b']);
}

fn batch_pickle(filenames: &[&str], write_data: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
    let mut buffer = vec![0x80, 0x02, b'}', b'q', 0x01, b'('];

    short_binstring(&mut buffer, b"batch_label");
    short_binstring(&mut buffer, b"training batch 1 of 5");

    short_binstring(&mut buffer, b"labels");
    buffer.extend_from_slice(&[b']', b'(']);
    for i in 0..filenames.len() {
        buffer.extend_from_slice(&[b'K', (i % 10) as u8]);
    }
    buffer.push(b'e');

    short_binstring(&mut buffer, b"data");
    write_data(&mut buffer);

    short_binstring(&mut buffer, b"filenames");
    buffer.extend_from_slice(&[b']', b'(']);
    for name in filenames {
        short_binstring(&mut buffer, name.as_bytes());
    }
    buffer.extend_from_slice(&[b'e', b'u', b'.']);
    buffer
}

/// A batch file laid out like the published dataset
pub fn cifar_batch_pickle(pixels: &[u8], filenames: &[&str]) -> Vec<u8> {
    let rows = (pixels.len() / RECORD_BYTES) as i32;
    batch_pickle(filenames, |buffer| ndarray(buffer, pixels, rows, RECORD_BYTES as i32))
}

/// A batch file whose array declares an explicit shape
pub fn cifar_batch_pickle_with_shape(pixels: &[u8], filenames: &[&str], rows: i32, cols: i32) -> Vec<u8> {
    batch_pickle(filenames, |buffer| ndarray(buffer, pixels, rows, cols))
}

/// A batch file storing the pixels as a plain byte string
pub fn raw_batch_pickle(pixels: &[u8], filenames: &[&str]) -> Vec<u8> {
    batch_pickle(filenames, |buffer| {
        buffer.push(b'B');
        buffer.write_u32::<LittleEndian>(pixels.len() as u32).unwrap();
        buffer.extend_from_slice(pixels);
    })
}

fn append_dir<W: Write>(builder: &mut Builder<W>, path: &str) {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    builder.append_data(&mut header, path, io::empty()).unwrap();
}

fn append_file<W: Write>(builder: &mut Builder<W>, path: &str, data: &[u8]) {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, path, data).unwrap();
}

/// Gzip-compressed tar holding `files` under a single top-level directory
pub fn tar_gz(top_dir: &str, files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    append_dir(&mut builder, top_dir);
    for (name, data) in files {
        append_file(&mut builder, &format!("{}/{}", top_dir, name), data);
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Archive whose second entry uses a raw, unvalidated name
pub fn tar_gz_with_raw_entry(top_dir: &str, raw_name: &[u8], data: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    append_dir(&mut builder, top_dir);

    let mut header = Header::new_old();
    header.as_old_mut().name[..raw_name.len()].copy_from_slice(raw_name);
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data).unwrap();

    builder.into_inner().unwrap().finish().unwrap()
}

/// Serves a prepared archive and records the URLs requested
pub struct InMemoryFetcher {
    archive: Vec<u8>,
    pub requested: RefCell<Vec<String>>,
}

impl InMemoryFetcher {
    pub fn new(archive: Vec<u8>) -> Self {
        InMemoryFetcher {
            archive,
            requested: RefCell::new(Vec::new()),
        }
    }
}

impl ArchiveFetcher for InMemoryFetcher {
    fn fetch(&self, url: &str) -> KitResult<Vec<u8>> {
        self.requested.borrow_mut().push(url.to_string());
        Ok(self.archive.clone())
    }
}

/// Always fails like an unreachable host
pub struct UnreachableFetcher;

impl ArchiveFetcher for UnreachableFetcher {
    fn fetch(&self, url: &str) -> KitResult<Vec<u8>> {
        Err(KitError::NetworkError(format!("Failed to download {}: connection refused", url)))
    }
}
