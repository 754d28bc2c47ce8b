use std::{
	fs::File,
	io,
	path::{Path, PathBuf},
};

use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

use crate::{Error, Result};

/// Packs `paths` into a zip at `archive_path`, each entry named after its file name.
pub fn compress(paths: &[PathBuf], archive_path: &Path) -> Result<PathBuf> {
	let mut zip = ZipWriter::new(File::create(archive_path)?);
	let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

	for path in paths {
		let name = path.file_name().and_then(|name| name.to_str()).ok_or_else(|| Error::Archive {
			message: format!("{} has no usable file name.", path.display()),
		})?;

		zip.start_file(name, options)?;

		io::copy(&mut File::open(path)?, &mut zip)?;
	}

	zip.finish()?;

	Ok(archive_path.to_path_buf())
}
