/// Compiled artifact container
///
/// A compiled type travels as an ELF relocatable object:
/// - `.slisp.code`: method bodies, one `Text` symbol per method
/// - `.slisp.const`: string constant pool
/// - `.slisp.meta`: type name, field count and per-method signatures,
///   including the deepest operand stack each method needs
///
/// Front-ends produce it through `TypeDef::write`, the loader reads it back
/// through `TypeDef::read`. Nothing here touches the file system.
use object::write::{Object, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, Object as _, ObjectSection, ObjectSymbol, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use thiserror::Error;

pub const CODE_SECTION: &str = ".slisp.code";
pub const CONST_SECTION: &str = ".slisp.const";
pub const META_SECTION: &str = ".slisp.meta";

pub const META_MAGIC: [u8; 4] = *b"SLFR";
pub const FORMAT_VERSION: u16 = 1;

/// Name of the zero-argument constructor every instantiable type carries.
pub const CONSTRUCTOR: &str = "<init>";

/// Generated executable representation of one type: its name and bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("malformed object container: {0}")]
    Read(#[from] object::read::Error),
    #[error("failed to write object container: {0}")]
    Write(#[from] object::write::Error),
    #[error("missing section {0}")]
    MissingSection(&'static str),
    #[error("malformed {section}: {message}")]
    Malformed { section: &'static str, message: String },
}

impl ArtifactError {
    fn malformed(section: &'static str, message: impl Into<String>) -> Self {
        ArtifactError::Malformed {
            section,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    pub name: String,
    pub arity: u8,
    pub locals: u16,
    pub max_stack: u32,
    pub returns_value: bool,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    pub field_count: u16,
    pub constants: Vec<String>,
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Serialize into an object container.
    pub fn write(&self) -> Result<CompiledArtifact, ArtifactError> {
        let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let code_section = obj.add_section(Vec::new(), CODE_SECTION.as_bytes().to_vec(), SectionKind::Text);
        let const_section = obj.add_section(Vec::new(), CONST_SECTION.as_bytes().to_vec(), SectionKind::ReadOnlyData);
        let meta_section = obj.add_section(Vec::new(), META_SECTION.as_bytes().to_vec(), SectionKind::ReadOnlyData);

        for method in &self.methods {
            let offset = obj.append_section_data(code_section, &method.body, 1);
            obj.add_symbol(Symbol {
                name: method.name.as_bytes().to_vec(),
                value: offset,
                size: method.body.len() as u64,
                kind: SymbolKind::Text,
                scope: SymbolScope::Compilation,
                weak: false,
                section: SymbolSection::Section(code_section),
                flags: SymbolFlags::None,
            });
        }

        obj.append_section_data(const_section, &self.encode_constants(), 1);
        obj.append_section_data(meta_section, &self.encode_meta()?, 1);

        Ok(CompiledArtifact {
            name: self.name.clone(),
            bytes: obj.write()?,
        })
    }

    fn encode_constants(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.constants.len() as u32).to_le_bytes());
        for constant in &self.constants {
            out.extend_from_slice(&(constant.len() as u32).to_le_bytes());
            out.extend_from_slice(constant.as_bytes());
        }
        out
    }

    fn encode_meta(&self) -> Result<Vec<u8>, ArtifactError> {
        let name_len = u16::try_from(self.name.len()).map_err(|_| ArtifactError::malformed(META_SECTION, "type name too long"))?;
        let method_count = u16::try_from(self.methods.len()).map_err(|_| ArtifactError::malformed(META_SECTION, "too many methods"))?;

        let mut out = Vec::new();
        out.extend_from_slice(&META_MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(&self.field_count.to_le_bytes());
        out.extend_from_slice(&method_count.to_le_bytes());
        for method in &self.methods {
            let method_name_len = u8::try_from(method.name.len()).map_err(|_| ArtifactError::malformed(META_SECTION, "method name too long"))?;
            out.push(method_name_len);
            out.extend_from_slice(method.name.as_bytes());
            out.push(method.arity);
            out.extend_from_slice(&method.locals.to_le_bytes());
            out.extend_from_slice(&method.max_stack.to_le_bytes());
            out.push(method.returns_value as u8);
        }
        Ok(out)
    }

    /// Parse an object container back into a type definition.
    ///
    /// Only the container is validated here; bytecode verification is the
    /// loader's job.
    pub fn read(bytes: &[u8]) -> Result<TypeDef, ArtifactError> {
        let file = object::File::parse(bytes)?;

        let code = file.section_by_name(CODE_SECTION).ok_or(ArtifactError::MissingSection(CODE_SECTION))?;
        let code_index = code.index();
        let code_bytes = code.data()?;
        let const_bytes = file.section_by_name(CONST_SECTION).ok_or(ArtifactError::MissingSection(CONST_SECTION))?.data()?;
        let meta_bytes = file.section_by_name(META_SECTION).ok_or(ArtifactError::MissingSection(META_SECTION))?.data()?;

        let constants = decode_constants(const_bytes)?;
        let (name, field_count, signatures) = decode_meta(meta_bytes)?;

        let mut methods = Vec::with_capacity(signatures.len());
        for signature in signatures {
            let symbol = file
                .symbols()
                .find(|symbol| symbol.kind() == SymbolKind::Text && symbol.section_index() == Some(code_index) && symbol.name().ok() == Some(signature.name.as_str()))
                .ok_or_else(|| ArtifactError::malformed(CODE_SECTION, format!("no code for method {}", signature.name)))?;

            let start = symbol.address() as usize;
            let end = start
                .checked_add(symbol.size() as usize)
                .filter(|end| *end <= code_bytes.len())
                .ok_or_else(|| ArtifactError::malformed(CODE_SECTION, format!("method {} lies outside the section", signature.name)))?;

            methods.push(MethodDef {
                body: code_bytes[start..end].to_vec(),
                ..signature
            });
        }

        Ok(TypeDef {
            name,
            field_count,
            constants,
            methods,
        })
    }
}

/// Little-endian cursor over a section's bytes
struct Reader<'a> {
    section: &'static str,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(section: &'static str, bytes: &'a [u8]) -> Self {
        Self { section, bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ArtifactError> {
        let slice = self
            .offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(self.offset..end))
            .ok_or_else(|| ArtifactError::malformed(self.section, "unexpected end of data"))?;
        self.offset += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ArtifactError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ArtifactError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, ArtifactError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self, len: usize) -> Result<String, ArtifactError> {
        let section = self.section;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ArtifactError::malformed(section, "invalid UTF-8"))
    }

    fn finish(&self) -> Result<(), ArtifactError> {
        if self.offset == self.bytes.len() {
            Ok(())
        } else {
            Err(ArtifactError::malformed(self.section, "trailing bytes"))
        }
    }
}

fn decode_constants(bytes: &[u8]) -> Result<Vec<String>, ArtifactError> {
    let mut reader = Reader::new(CONST_SECTION, bytes);
    let count = reader.u32()?;
    let mut constants = Vec::new();
    for _ in 0..count {
        let len = reader.u32()? as usize;
        constants.push(reader.string(len)?);
    }
    reader.finish()?;
    Ok(constants)
}

fn decode_meta(bytes: &[u8]) -> Result<(String, u16, Vec<MethodDef>), ArtifactError> {
    let mut reader = Reader::new(META_SECTION, bytes);
    if reader.take(4)? != META_MAGIC {
        return Err(ArtifactError::malformed(META_SECTION, "bad magic"));
    }
    let version = reader.u16()?;
    if version != FORMAT_VERSION {
        return Err(ArtifactError::malformed(META_SECTION, format!("unsupported format version {}", version)));
    }
    let name_len = reader.u16()? as usize;
    let name = reader.string(name_len)?;
    let field_count = reader.u16()?;
    let method_count = reader.u16()?;

    let mut methods: Vec<MethodDef> = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        let method_name_len = reader.u8()? as usize;
        let method_name = reader.string(method_name_len)?;
        if methods.iter().any(|m| m.name == method_name) {
            return Err(ArtifactError::malformed(META_SECTION, format!("duplicate method {}", method_name)));
        }
        let arity = reader.u8()?;
        let locals = reader.u16()?;
        let max_stack = reader.u32()?;
        let returns_value = match reader.u8()? {
            0 => false,
            1 => true,
            _ => return Err(ArtifactError::malformed(META_SECTION, "bad return flag")),
        };
        methods.push(MethodDef {
            name: method_name,
            arity,
            locals,
            max_stack,
            returns_value,
            body: Vec::new(),
        });
    }
    reader.finish()?;
    Ok((name, field_count, methods))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IRInstruction;

    fn sample_type() -> TypeDef {
        let mut init = Vec::new();
        IRInstruction::PushInt(5).encode(&mut init);
        IRInstruction::StoreField(0).encode(&mut init);
        IRInstruction::ReturnVoid.encode(&mut init);

        let mut run = Vec::new();
        IRInstruction::PushConst(0).encode(&mut run);
        IRInstruction::Return.encode(&mut run);

        TypeDef {
            name: "Fragment$1".to_string(),
            field_count: 1,
            constants: vec!["héllo".to_string()],
            methods: vec![
                MethodDef {
                    name: CONSTRUCTOR.to_string(),
                    arity: 0,
                    locals: 0,
                    max_stack: 1,
                    returns_value: false,
                    body: init,
                },
                MethodDef {
                    name: "run".to_string(),
                    arity: 0,
                    locals: 2,
                    max_stack: 1,
                    returns_value: true,
                    body: run,
                },
            ],
        }
    }

    #[test]
    fn written_container_reads_back() {
        let type_def = sample_type();
        let artifact = type_def.write().unwrap();
        assert_eq!(artifact.name, "Fragment$1");
        assert_eq!(&artifact.bytes[..4], b"\x7fELF");
        assert_eq!(TypeDef::read(&artifact.bytes).unwrap(), type_def);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(TypeDef::read(b"definitely not an object"), Err(ArtifactError::Read(_))));
    }

    #[test]
    fn object_without_sections_is_rejected() {
        let obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
        let bytes = obj.write().unwrap();
        assert!(matches!(TypeDef::read(&bytes), Err(ArtifactError::MissingSection(CODE_SECTION))));
    }

    #[test]
    fn truncated_meta_is_rejected() {
        let mut meta = Vec::new();
        meta.extend_from_slice(&META_MAGIC);
        meta.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        assert!(decode_meta(&meta).is_err());
    }

    #[test]
    fn duplicate_methods_are_rejected() {
        let mut type_def = sample_type();
        type_def.methods[1].name = CONSTRUCTOR.to_string();
        let artifact = type_def.write().unwrap();
        assert!(matches!(TypeDef::read(&artifact.bytes), Err(ArtifactError::Malformed { section: META_SECTION, .. })));
    }
}
