use std::{ffi::c_char, fmt, io};

/// Kernel identification of the capturing host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInfo {
    pub sys_name: String,
    pub release: String,
    pub machine: String,
}

impl fmt::Display for KernelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.sys_name, self.release, self.machine)
    }
}

pub fn uname() -> io::Result<KernelInfo> {
    let mut buf = unsafe { std::mem::zeroed::<libc::utsname>() };
    if unsafe { libc::uname(&mut buf) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(KernelInfo {
        sys_name: field(&buf.sysname),
        release: field(&buf.release),
        machine: field(&buf.machine),
    })
}

/// Text of a fixed-size utsname field, up to the first NUL or the end of the
/// array when the kernel filled it completely.
fn field(buf: &[c_char]) -> String {
    let bytes: Vec<u8> = buf
        .iter()
        .map(|&c| c as u8)
        .take_while(|&b| b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
