//! Artifact 单元测试
//!
//! 覆盖平台命名、数据段布局、PE 头修补以及完整的打包/加载流程


/// Minimal PE image: DOS header with a cleared signature, PE header at
/// 0x80 with two sections whose raw data ends at 0x500.
pub(crate) fn pe_stub() -> Vec<u8> {
    let mut image = vec![0u8; 0x500];
    image[0] = 0;
    image[1] = 0;
    image[60..64].copy_from_slice(&0x80u32.to_le_bytes());

    let pe = 0x80;
    image[pe..pe + 4].copy_from_slice(b"PE\0\0");
    // file header: machine, sections, ..., size of optional header
    image[pe + 4..pe + 6].copy_from_slice(&0x14cu16.to_le_bytes());
    image[pe + 6..pe + 8].copy_from_slice(&2u16.to_le_bytes());
    image[pe + 20..pe + 22].copy_from_slice(&224u16.to_le_bytes());
    // optional header subsystem: GUI
    image[pe + 92..pe + 94].copy_from_slice(&2u16.to_le_bytes());

    let sections = pe + 4 + 20 + 224;
    for (i, (pointer, size)) in [(0x200u32, 0x200u32), (0x400, 0x100)].iter().enumerate() {
        let header = sections + i * 40;
        image[header..header + 5].copy_from_slice(b".sect");
        image[header + 16..header + 20].copy_from_slice(&size.to_le_bytes());
        image[header + 20..header + 24].copy_from_slice(&pointer.to_le_bytes());
    }
    // recognisable payload in the section bodies
    for b in &mut image[0x200..0x500] {
        *b = 0xCC;
    }
    image
}

/// Non-PE stub used for the trailer platforms.
pub(crate) fn elf_stub() -> Vec<u8> {
    let mut image = b"\x7fELF launcher stub".to_vec();
    image.resize(4096, 0x90);
    image
}
