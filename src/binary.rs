use log::debug;
use object::{Object, ObjectSection, ObjectSymbol, SectionKind, SymbolKind};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    Elf32,
    Elf64,
}

/// Read-only view over a native shared object.
#[derive(Debug, Clone)]
pub struct NativeBinary {
    data: Vec<u8>,
    format: ObjectFormat,
}

impl NativeBinary {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let format = match object::FileKind::parse(data.as_slice())? {
            object::FileKind::Elf32 => ObjectFormat::Elf32,
            object::FileKind::Elf64 => ObjectFormat::Elf64,
            _ => return Err(Error::NotElf),
        };
        // Reject truncated headers up front rather than on first query.
        object::File::parse(data.as_slice())?;
        Ok(Self { data, format })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Reading native binary {}", path.display());
        Self::new(std::fs::read(path)?)
    }

    pub fn format(&self) -> ObjectFormat {
        self.format
    }

    fn file(&self) -> Result<object::File<'_>> {
        Ok(object::File::parse(self.data.as_slice())?)
    }

    /// Names of functions defined in an executable section and exported
    /// through the dynamic symbol table. Section names are not trusted since
    /// packers rename or strip them.
    pub fn exported_functions(&self) -> Result<BTreeSet<String>> {
        let file = self.file()?;

        let mut names = BTreeSet::new();
        for symbol in file.dynamic_symbols() {
            if !symbol.is_definition() || !symbol.is_global() || symbol.kind() != SymbolKind::Text {
                continue;
            }
            let in_code = symbol
                .section_index()
                .and_then(|index| file.section_by_index(index).ok())
                .is_some_and(|section| section.kind() == SectionKind::Text);
            if !in_code {
                continue;
            }
            match symbol.name() {
                Ok(name) if !name.is_empty() => {
                    names.insert(name.to_string());
                }
                _ => {}
            }
        }
        if names.is_empty() {
            return Err(Error::NoExports);
        }
        Ok(names)
    }

    /// Whether `needle` occurs in the read-only data of the binary. Falls back
    /// to the whole file when no read-only section is present.
    pub fn string_pool_contains(&self, needle: &[u8]) -> Result<bool> {
        let file = self.file()?;
        let mut saw_pool = false;
        for section in file.sections() {
            if !matches!(section.kind(), SectionKind::ReadOnlyString | SectionKind::ReadOnlyData) {
                continue;
            }
            saw_pool = true;
            if memchr::memmem::find(section.data()?, needle).is_some() {
                return Ok(true);
            }
        }
        Ok(!saw_pool && memchr::memmem::find(&self.data, needle).is_some())
    }
}

/// Hand-assembled ELF64 shared objects for tests.
#[cfg(test)]
pub(crate) mod fixtures {
    const SHSTRTAB: &[u8] = b"\0.text\0.rodata\0.dynstr\0.dynsym\0.shstrtab\0";

    fn align(buf: &mut Vec<u8>) {
        while buf.len() % 8 != 0 {
            buf.push(0);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn section_header(
        out: &mut Vec<u8>,
        name: u32,
        ty: u32,
        flags: u64,
        (offset, size): (usize, usize),
        link: u32,
        info: u32,
        entsize: u64,
    ) {
        out.extend(name.to_le_bytes());
        out.extend(ty.to_le_bytes());
        out.extend(flags.to_le_bytes());
        out.extend(0u64.to_le_bytes());
        out.extend((offset as u64).to_le_bytes());
        out.extend((size as u64).to_le_bytes());
        out.extend(link.to_le_bytes());
        out.extend(info.to_le_bytes());
        out.extend(8u64.to_le_bytes());
        out.extend(entsize.to_le_bytes());
    }

    /// An x86-64 `ET_DYN` exporting `exports` from `.text`, with `rodata` as
    /// its read-only data.
    pub fn shared_object(exports: &[&str], rodata: &[u8]) -> Vec<u8> {
        let mut dynstr = vec![0u8];
        let mut dynsym = vec![0u8; 24];
        for (i, name) in exports.iter().enumerate() {
            let offset = dynstr.len() as u32;
            dynstr.extend(name.as_bytes());
            dynstr.push(0);

            dynsym.extend(offset.to_le_bytes());
            dynsym.push(0x12); // STB_GLOBAL, STT_FUNC
            dynsym.push(0);
            dynsym.extend(1u16.to_le_bytes());
            dynsym.extend((i as u64 * 4).to_le_bytes());
            dynsym.extend(4u64.to_le_bytes());
        }
        let text = vec![0xc3u8; 4 * exports.len().max(1)];

        let mut out = vec![0u8; 64];
        let place = |out: &mut Vec<u8>, bytes: &[u8]| {
            align(out);
            let at = out.len();
            out.extend_from_slice(bytes);
            (at, bytes.len())
        };
        let text_at = place(&mut out, &text);
        let rodata_at = place(&mut out, rodata);
        let dynstr_at = place(&mut out, &dynstr);
        let dynsym_at = place(&mut out, &dynsym);
        let shstrtab_at = place(&mut out, SHSTRTAB);
        align(&mut out);
        let shoff = out.len() as u64;

        out.extend(std::iter::repeat(0u8).take(64));
        section_header(&mut out, 1, 1, 0x6, text_at, 0, 0, 0);
        section_header(&mut out, 7, 1, 0x2, rodata_at, 0, 0, 0);
        section_header(&mut out, 15, 3, 0x2, dynstr_at, 0, 0, 0);
        section_header(&mut out, 23, 11, 0x2, dynsym_at, 3, 1, 24);
        section_header(&mut out, 31, 3, 0, shstrtab_at, 0, 0, 0);

        let mut header = Vec::with_capacity(64);
        header.extend(b"\x7fELF");
        header.extend([2, 1, 1, 0]);
        header.extend([0u8; 8]);
        header.extend(3u16.to_le_bytes()); // ET_DYN
        header.extend(62u16.to_le_bytes()); // EM_X86_64
        header.extend(1u32.to_le_bytes());
        header.extend(0u64.to_le_bytes()); // e_entry
        header.extend(0u64.to_le_bytes()); // e_phoff
        header.extend(shoff.to_le_bytes());
        header.extend(0u32.to_le_bytes());
        header.extend(64u16.to_le_bytes());
        header.extend(56u16.to_le_bytes());
        header.extend(0u16.to_le_bytes());
        header.extend(64u16.to_le_bytes());
        header.extend(6u16.to_le_bytes());
        header.extend(5u16.to_le_bytes());
        out[..64].copy_from_slice(&header);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_exported_functions() {
        let binary =
            NativeBinary::new(fixtures::shared_object(&["JNI_OnLoad", "Java_a_B_c"], b"")).unwrap();
        assert_eq!(binary.format(), ObjectFormat::Elf64);
        let names: Vec<_> = binary.exported_functions().unwrap().into_iter().collect();
        assert_eq!(names, ["JNI_OnLoad", "Java_a_B_c"]);
    }

    #[test]
    fn finds_exports_without_section_names() {
        let mut data = fixtures::shared_object(&["JNI_OnLoad", "Java_a_B_c"], b"");
        let at = memchr::memmem::find(&data, b".text\0").unwrap();
        data[at..at + 6].copy_from_slice(b".code\0");

        let binary = NativeBinary::new(data).unwrap();
        let names: Vec<_> = binary.exported_functions().unwrap().into_iter().collect();
        assert_eq!(names, ["JNI_OnLoad", "Java_a_B_c"]);
    }

    #[test]
    fn binary_without_exports_is_an_error() {
        let binary = NativeBinary::new(fixtures::shared_object(&[], b"")).unwrap();
        assert!(matches!(binary.exported_functions(), Err(Error::NoExports)));
    }

    #[test]
    fn searches_read_only_data() {
        let binary =
            NativeBinary::new(fixtures::shared_object(&["f"], b"\0packages/app/\0")).unwrap();
        assert!(binary.string_pool_contains(b"packages/app/").unwrap());
        assert!(!binary.string_pool_contains(b"flutter_assets/").unwrap());
    }

    #[test]
    fn rejects_non_elf_input() {
        assert!(NativeBinary::new(b"not a binary at all".to_vec()).is_err());
    }
}
