use std::{
    fs::{canonicalize, create_dir_all, exists, read, remove_file, write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use rand::random;

pub fn create_temp_file(dir: &Path) -> anyhow::Result<()> {
    // needed to be completely unambiguous which directory we are checking
    if !dir.is_absolute() {
        return Err(anyhow::Error::msg(
            "must pass absolute path to create_temp_file",
        ));
    }

    if canonicalize(dir)? != dir {
        return Err(anyhow::Error::msg(
            "must pass canonical path to create_temp_file",
        ));
    }

    // this ensures that we create a new file
    let mut filename = dir.join(format!(".check_{}", random::<u64>()));
    let mut count = 0;

    while exists(&filename)? {
        filename = dir.join(format!(".check_{}", random::<u64>()));

        if count < 10 {
            count += 1;
        } else {
            return Err(anyhow::Error::msg(format!(
                "create_temp_file failed to find unique filename ten times for directory {dir:?}"
            )));
        }
    }

    // mock data to make sure that we can read any file we create
    let data = random::<i64>().to_ne_bytes();

    write(&filename, data)?;

    if read(&filename)? != data {
        return Err(anyhow::Error::msg(format!(
            "data readback failed on {filename:?}"
        )));
    }

    remove_file(&filename)?;

    Ok(())
}

// the upload directory must exist (it is created if it does not) and be
// writable before any service starts
pub fn upload_dir_is_writable(dir: &Path) -> anyhow::Result<PathBuf> {
    create_dir_all(dir).with_context(|| format!("failed to create upload_dir {dir:?}"))?;

    let dir = canonicalize(dir)?;

    create_temp_file(&dir).with_context(|| format!("upload_dir {dir:?} is not writable"))?;

    Ok(dir)
}
