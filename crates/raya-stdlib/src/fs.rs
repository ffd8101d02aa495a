//! Filesystem module (`native:fs`)
//!
//! Text file and directory operations. Failures come back as error values
//! of the form `fs.<function>: <path>: <reason>`.

use crate::args::{finish, string_value, Args, Thrown};
use crate::build_module;
use raya_ffi::{
    raya_array_set, raya_value_array, raya_value_bool, raya_value_free, raya_value_null,
    RayaContext, RayaModule, RayaNativeFn, RayaValue,
};
use std::fs;
use std::io::{self, Write};
use std::path::Path;

const FUNCTIONS: &[(&str, RayaNativeFn, usize)] = &[
    ("readFile", read_file, 1),
    ("writeFile", write_file, 2),
    ("appendFile", append_file, 2),
    ("exists", exists, 1),
    ("isDir", is_dir, 1),
    ("mkdir", mkdir, 1),
    ("remove", remove, 1),
    ("readDir", read_dir, 1),
];

/// Build the `fs` module
pub fn module() -> *mut RayaModule {
    build_module("fs", FUNCTIONS)
}

/// Entry point used when the module is loaded from a shared library
#[no_mangle]
pub extern "C" fn raya_module_init_fs() -> *mut RayaModule {
    module()
}

fn io_failure(args: &Args<'_>, path: &str, err: io::Error) -> Thrown {
    args.error(format!("{}: {}", path, err))
}

/// Read file as UTF-8 string
unsafe extern "C" fn read_file(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "fs.readFile", argv, argc);
    finish((|| {
        args.expect_count(1)?;
        let path = args.string(0)?;
        let text = fs::read_to_string(&path).map_err(|e| io_failure(&args, &path, e))?;
        Ok(string_value(ctx, &text))
    })())
}

/// Write string to file, replacing its contents
unsafe extern "C" fn write_file(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "fs.writeFile", argv, argc);
    finish((|| {
        args.expect_count(2)?;
        let path = args.string(0)?;
        let data = args.string(1)?;
        fs::write(&path, data).map_err(|e| io_failure(&args, &path, e))?;
        Ok(raya_value_null())
    })())
}

/// Append string to file, creating it if needed
unsafe extern "C" fn append_file(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "fs.appendFile", argv, argc);
    finish((|| {
        args.expect_count(2)?;
        let path = args.string(0)?;
        let data = args.string(1)?;
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(data.as_bytes()))
            .map_err(|e| io_failure(&args, &path, e))?;
        Ok(raya_value_null())
    })())
}

unsafe extern "C" fn exists(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "fs.exists", argv, argc);
    finish((|| {
        args.expect_count(1)?;
        let path = args.string(0)?;
        Ok(raya_value_bool(Path::new(&path).exists() as i32))
    })())
}

unsafe extern "C" fn is_dir(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "fs.isDir", argv, argc);
    finish((|| {
        args.expect_count(1)?;
        let path = args.string(0)?;
        Ok(raya_value_bool(Path::new(&path).is_dir() as i32))
    })())
}

/// Create directory tree (recursive)
unsafe extern "C" fn mkdir(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "fs.mkdir", argv, argc);
    finish((|| {
        args.expect_count(1)?;
        let path = args.string(0)?;
        fs::create_dir_all(&path).map_err(|e| io_failure(&args, &path, e))?;
        Ok(raya_value_null())
    })())
}

/// Remove a file or an empty directory
unsafe extern "C" fn remove(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "fs.remove", argv, argc);
    finish((|| {
        args.expect_count(1)?;
        let path = args.string(0)?;
        let result = if Path::new(&path).is_dir() {
            fs::remove_dir(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| io_failure(&args, &path, e))?;
        Ok(raya_value_null())
    })())
}

/// List entry names, sorted
unsafe extern "C" fn read_dir(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "fs.readDir", argv, argc);
    finish((|| {
        args.expect_count(1)?;
        let path = args.string(0)?;
        let names = entry_names(Path::new(&path)).map_err(|e| io_failure(&args, &path, e))?;

        let array = raya_value_array(ctx, names.len());
        if array.is_null() {
            return Err(args.error(format!("{}: too many entries", path)));
        }
        for (index, name) in names.iter().enumerate() {
            let element = string_value(ctx, name);
            if raya_array_set(array, index, element) != 0 {
                raya_value_free(element);
                raya_value_free(array);
                return Err(args.error(format!("{}: could not build entry list", path)));
            }
        }
        Ok(array)
    })())
}

fn entry_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}
