use crate::jvm_error::{VmError, VmExecResult};
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::fs;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use zip::result::ZipError;
use zip::ZipArchive;

/// A place classfile bytes can come from. The loader only needs this
/// "fetch bytes by name" capability; where the bytes live is the search
/// path's business.
pub trait ClassPath {
    /// Returns the class bytes, or None when this search-path entry does
    /// not contain the class.
    fn find_class(&self, class_name: &str) -> VmExecResult<Option<Vec<u8>>>;

    /// A printable description of this entry for -verbose:class tracing.
    fn describe(&self) -> String;
}

/// Ordered search path over all configured entries.
#[derive(Default)]
pub struct ClassFinder {
    pub class_paths: Vec<Box<dyn ClassPath>>,
}

impl ClassFinder {
    pub fn new() -> ClassFinder {
        ClassFinder::default()
    }

    /// Searches the entries in order; reports where the bytes were found.
    pub fn find_class(&self, name: &str) -> VmExecResult<Option<(Vec<u8>, String)>> {
        for class_path in &self.class_paths {
            if let Some(bytes) = class_path.find_class(name)? {
                return Ok(Some((bytes, class_path.describe())));
            }
        }
        Ok(None)
    }
}

/// Loads classes from a directory root, e.g. `-classpath ./out`.
pub struct FileSystemClassPath {
    root: PathBuf,
}

impl FileSystemClassPath {
    pub fn new(path: &str) -> VmExecResult<FileSystemClassPath> {
        let root = fs::canonicalize(PathBuf::from(path))
            .map_err(|_| VmError::ClassPathNotExist(path.to_string()))?;
        if !root.is_dir() {
            return Err(VmError::ClassPathNotExist(root.to_string_lossy().to_string()));
        }
        Ok(FileSystemClassPath { root })
    }
}

impl ClassPath for FileSystemClassPath {
    fn find_class(&self, class_name: &str) -> VmExecResult<Option<Vec<u8>>> {
        let mut full_path = self.root.clone();
        full_path.push(class_name);
        full_path.set_extension("class");
        if !full_path.exists() {
            return Ok(None);
        }
        fs::read(&full_path)
            .map(Some)
            .map_err(|e| VmError::ReadClassBytesError(e.to_string()))
    }

    fn describe(&self) -> String {
        self.root.to_string_lossy().to_string()
    }
}

/// Loads classes out of a JAR (a zip file with entries named
/// `pkg/Name.class`).
pub struct JarFileClassPath {
    jar_path: String,
    zip: RefCell<ZipArchive<BufReader<File>>>,
}

impl Debug for JarFileClassPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "JarFileClassPath => {}", self.jar_path)
    }
}

impl JarFileClassPath {
    pub fn new(path: &str) -> VmExecResult<JarFileClassPath> {
        let jar_path = fs::canonicalize(PathBuf::from(path))
            .map_err(|_| VmError::JarFileNotExist(path.to_string()))?;
        let file = File::open(&jar_path).map_err(|e| VmError::ReadClassBytesError(e.to_string()))?;
        let zip = ZipArchive::new(BufReader::new(file))
            .map_err(|e| VmError::ReadClassBytesError(e.to_string()))?;
        Ok(JarFileClassPath {
            jar_path: jar_path.to_string_lossy().to_string(),
            zip: RefCell::new(zip),
        })
    }
}

impl ClassPath for JarFileClassPath {
    fn find_class(&self, class_name: &str) -> VmExecResult<Option<Vec<u8>>> {
        let entry_name = format!("{class_name}.class");
        match self.zip.borrow_mut().by_name(&entry_name) {
            Ok(mut entry) => {
                let mut buffer = Vec::with_capacity(entry.size() as usize);
                entry
                    .read_to_end(&mut buffer)
                    .map_err(|e| VmError::ReadClassBytesError(e.to_string()))?;
                Ok(Some(buffer))
            }
            Err(ZipError::FileNotFound) => Ok(None),
            Err(e) => Err(VmError::ReadClassBytesError(e.to_string())),
        }
    }

    fn describe(&self) -> String {
        self.jar_path.clone()
    }
}
