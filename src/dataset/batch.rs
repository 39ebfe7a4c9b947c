//! Batch file decoding
//!
//! A batch file is a pickled mapping. Two entries are required:
//! `data`, a numpy `uint8` array of shape `(N, 3072)` holding channel-planar
//! records, and `filenames`, a list of N names. Decoding is strict: the whole
//! batch is validated before any record is handed out.

use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path};

use crate::dataset::layout::RECORD_BYTES;
use crate::errors::{KitError, KitResult};
use crate::io::pickle::{self, Object};

/// Dataset partition a batch file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    /// Classify a batch file by its name prefix
    ///
    /// `data*` files are training batches and `test*` files are test batches.
    /// Anything else (metadata, readme) is not a batch.
    pub fn from_batch_name(name: &str) -> Option<Self> {
        if name.starts_with("data") {
            Some(Split::Train)
        } else if name.starts_with("test") {
            Some(Split::Test)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

/// One image of a batch
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// Position within the batch
    pub index: usize,
    /// Output file name
    pub filename: &'a str,
    /// Channel-planar pixels, `RECORD_BYTES` long
    pub pixels: &'a [u8],
}

/// A fully validated batch file
#[derive(Debug, Clone)]
pub struct CifarBatch {
    /// Name the batch was loaded from (e.g. `data_batch_1`)
    pub name: String,
    pixels: Vec<u8>,
    filenames: Vec<String>,
}

fn format_error(batch: &str, msg: impl std::fmt::Display) -> KitError {
    KitError::FormatError(format!("{}: {}", batch, msg))
}

impl CifarBatch {
    /// Load and validate a batch file from disk
    pub fn load(path: &Path) -> KitResult<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!("Loading batch {}", path.display());

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::from_reader(&mut reader, &name)
    }

    /// Decode a batch from a pickle stream
    pub fn from_reader<R: BufRead>(reader: &mut R, name: &str) -> KitResult<Self> {
        let root = pickle::load(reader)?;
        Self::from_object(root, name)
    }

    /// Validate an unpickled mapping against the batch schema
    pub fn from_object(root: Object, name: &str) -> KitResult<Self> {
        let Object::Dict(entries) = root else {
            return Err(format_error(name, format!("expected a mapping at top level, got {}", root.kind())));
        };

        let mut data = None;
        let mut filenames = None;
        for (key, value) in entries {
            if key.is_key("data") {
                data = Some(value);
            } else if key.is_key("filenames") {
                filenames = Some(value);
            } else {
                debug!("{}: ignoring entry {:?}", name, String::from_utf8_lossy(key.as_bytes().unwrap_or(b"?")));
            }
        }

        let data = data.ok_or_else(|| format_error(name, "missing required key 'data'"))?;
        let filenames = filenames.ok_or_else(|| format_error(name, "missing required key 'filenames'"))?;

        let (pixels, shape) = decode_pixel_array(data, name)?;
        let filenames = decode_filenames(filenames, name)?;

        if let Some(shape) = shape {
            let expected = [filenames.len(), RECORD_BYTES];
            if shape.as_slice() != expected {
                return Err(format_error(name, format!(
                    "array shape {:?} does not match {} records of {} bytes",
                    shape, filenames.len(), RECORD_BYTES
                )));
            }
        }

        let expected_len = filenames.len().checked_mul(RECORD_BYTES)
            .ok_or_else(|| format_error(name, "record count overflows"))?;
        if pixels.len() != expected_len {
            return Err(format_error(name, format!(
                "pixel buffer holds {} bytes, expected {} filenames x {} = {}",
                pixels.len(), filenames.len(), RECORD_BYTES, expected_len
            )));
        }

        debug!("{}: decoded {} records", name, filenames.len());
        Ok(CifarBatch {
            name: name.to_string(),
            pixels,
            filenames,
        })
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    /// Iterate over the records in stored order
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.pixels
            .chunks_exact(RECORD_BYTES)
            .zip(self.filenames.iter())
            .enumerate()
            .map(|(index, (pixels, filename))| Record {
                index,
                filename: filename.as_str(),
                pixels,
            })
    }
}

/// Extract the raw buffer and, when present, the declared shape
fn decode_pixel_array(data: Object, batch: &str) -> KitResult<(Vec<u8>, Option<Vec<usize>>)> {
    match data {
        Object::Bytes(raw) => Ok((raw, None)),
        Object::Build { object, state } => {
            let is_ndarray = matches!(&*object, Object::Reduce { callable, .. }
                if callable.is_class("numpy.core.multiarray", "_reconstruct")
                    || callable.is_class("numpy._core.multiarray", "_reconstruct"));
            if !is_ndarray {
                return Err(format_error(batch, "'data' is not a numpy array"));
            }
            decode_ndarray_state(*state, batch)
        }
        other => Err(format_error(batch, format!("'data' has unsupported type {}", other.kind()))),
    }
}

// ndarray state: (version, shape, dtype, is_fortran, raw_bytes)
fn decode_ndarray_state(state: Object, batch: &str) -> KitResult<(Vec<u8>, Option<Vec<usize>>)> {
    let Object::Tuple(mut fields) = state else {
        return Err(format_error(batch, "array state is not a tuple"));
    };
    if fields.len() != 5 {
        return Err(format_error(batch, format!("array state has {} fields, expected 5", fields.len())));
    }

    let raw = fields.pop().unwrap_or(Object::None);
    let fortran = fields.pop().unwrap_or(Object::None);
    let dtype = fields.pop().unwrap_or(Object::None);
    let shape = fields.pop().unwrap_or(Object::None);

    if dtype_code(&dtype) != Some(b"u1".as_slice()) {
        return Err(format_error(batch, "array dtype is not uint8"));
    }

    if fortran == Object::Bool(true) {
        return Err(format_error(batch, "Fortran-ordered arrays are not supported"));
    }

    let shape = match shape {
        Object::Tuple(dims) => dims
            .into_iter()
            .map(|d| match d {
                Object::Int(v) if v >= 0 => Ok(v as usize),
                other => Err(format_error(batch, format!("invalid array dimension {:?}", other))),
            })
            .collect::<KitResult<Vec<usize>>>()?,
        other => return Err(format_error(batch, format!("array shape has type {}", other.kind()))),
    };

    let raw = match raw {
        Object::Bytes(raw) => raw,
        // Arrays pickled under Python 2 and loaded as latin-1 text
        Object::Unicode(text) => text
            .chars()
            .map(|c| u8::try_from(c).map_err(|_| {
                format_error(batch, format!("array payload holds {:?}, which is not a latin-1 byte", c))
            }))
            .collect::<KitResult<Vec<u8>>>()?,
        other => return Err(format_error(batch, format!("array payload has type {}", other.kind()))),
    };

    Ok((raw, Some(shape)))
}

// The dtype is pickled as numpy.dtype(code, 0, 1) followed by BUILD.
fn dtype_code(dtype: &Object) -> Option<&[u8]> {
    let reduce = match dtype {
        Object::Build { object, .. } => object.as_ref(),
        other => other,
    };
    match reduce {
        Object::Reduce { callable, args } if callable.is_class("numpy", "dtype") => match args.as_ref() {
            Object::Tuple(args) => args.first().and_then(Object::as_bytes),
            _ => None,
        },
        _ => None,
    }
}

fn decode_filenames(filenames: Object, batch: &str) -> KitResult<Vec<String>> {
    let items = match filenames {
        Object::List(items) | Object::Tuple(items) => items,
        other => return Err(format_error(batch, format!("'filenames' has type {}", other.kind()))),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let name = match item {
                Object::Bytes(raw) => String::from_utf8(raw)
                    .map_err(|_| format_error(batch, format!("filename {} is not valid UTF-8", i)))?,
                Object::Unicode(name) => name,
                other => return Err(format_error(batch, format!("filename {} has type {}", i, other.kind()))),
            };
            validate_filename(&name, batch)?;
            Ok(name)
        })
        .collect()
}

// A record name must stay inside its split directory.
fn validate_filename(name: &str, batch: &str) -> KitResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(format_error(batch, format!("filename {:?} is not a plain file name", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(module_name: &str, class_name: &str) -> Object {
        Object::Class {
            module_name: module_name.to_string(),
            class_name: class_name.to_string(),
        }
    }

    /// A one-record batch whose pixel payload was loaded as latin-1 text
    fn text_payload_batch(payload: String) -> Object {
        let dtype = Object::Reduce {
            callable: Box::new(class("numpy", "dtype")),
            args: Box::new(Object::Tuple(vec![Object::Bytes(b"u1".to_vec()), Object::Int(0), Object::Int(1)])),
        };
        let array = Object::Build {
            object: Box::new(Object::Reduce {
                callable: Box::new(class("numpy.core.multiarray", "_reconstruct")),
                args: Box::new(Object::Tuple(vec![])),
            }),
            state: Box::new(Object::Tuple(vec![
                Object::Int(1),
                Object::Tuple(vec![Object::Int(1), Object::Int(RECORD_BYTES as i64)]),
                dtype,
                Object::Bool(false),
                Object::Unicode(payload),
            ])),
        };
        Object::Dict(vec![
            (Object::Bytes(b"data".to_vec()), array),
            (Object::Bytes(b"filenames".to_vec()), Object::List(vec![Object::Bytes(b"a.png".to_vec())])),
        ])
    }

    #[test]
    fn test_latin1_text_payload() {
        let payload: String = (0..RECORD_BYTES).map(|i| char::from((i % 256) as u8)).collect();
        let batch = CifarBatch::from_object(text_payload_batch(payload), "data_batch_1").unwrap();
        let record = batch.records().next().unwrap();
        assert_eq!(record.pixels[255], 255);
        assert_eq!(record.pixels[256], 0);
    }

    #[test]
    fn test_text_payload_beyond_latin1_is_format_error() {
        let mut payload: String = std::iter::repeat('a').take(RECORD_BYTES - 1).collect();
        payload.push('\u{100}');
        let result = CifarBatch::from_object(text_payload_batch(payload), "data_batch_1");
        assert!(matches!(result, Err(KitError::FormatError(_))));
    }

    #[test]
    fn test_split_from_batch_name() {
        assert_eq!(Split::from_batch_name("data_batch_3"), Some(Split::Train));
        assert_eq!(Split::from_batch_name("test_batch"), Some(Split::Test));
        assert_eq!(Split::from_batch_name("batches.meta"), None);
    }
}
