//! Cross-file resolution.
//!
//! Two ordered passes over the parsed set. Pass A links imports: bundled
//! well-known types are parsed on demand and appended to the set, every
//! `Import` gets its target file index, and public imports are re-exported
//! transitively. Pass B assigns fully-qualified names, copies `extend` fields
//! onto their bases, and resolves every named field type to its defining
//! file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::debug;

use crate::ast::{
    Extend, FieldType, FileId, Import, ImportKind, Message, MessageField, NamedType, ProtoFile,
    TypeKind, TypeRef,
};
use crate::parser::parse_file;
use crate::well_known;
use crate::{Error, ResolveError};

/// The parsed files of one generation run. Indices into `files` are stable:
/// resolution only appends (bundled types) and annotates.
#[derive(Debug, Default)]
pub struct FileSet {
    pub files: Vec<ProtoFile>,
}

/// Normalizes a relative path into the `/`-separated form used as the import
/// resolution key.
pub fn path_key(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl FileSet {
    pub fn new(files: Vec<ProtoFile>) -> FileSet {
        FileSet { files }
    }

    /// Runs both resolution passes.
    pub fn resolve(&mut self) -> Result<(), Error> {
        self.link_imports()?;
        self.resolve_types()?;
        Ok(())
    }

    fn index(&self) -> HashMap<String, FileId> {
        self.files
            .iter()
            .enumerate()
            .map(|(id, file)| (path_key(&file.rel_path), id))
            .collect()
    }

    /// Pass A: absorb bundled dependencies, set every import's target, and
    /// propagate public imports.
    fn link_imports(&mut self) -> Result<(), Error> {
        // Absorbing a bundled file can introduce further bundled imports
        // (api.proto pulls in type.proto), so sweep to a fixed point before
        // rebuilding the index. The file list must not be grown while the
        // index borrows it, hence the two-phase shape.
        loop {
            let index = self.index();
            let mut missing: Vec<String> = Vec::new();
            for file in &self.files {
                for import in &file.imports {
                    if !index.contains_key(&import.path)
                        && well_known::is_well_known(&import.path)
                        && !missing.contains(&import.path)
                    {
                        missing.push(import.path.clone());
                    }
                }
            }
            if missing.is_empty() {
                break;
            }
            for path in missing {
                let source = match well_known::lookup(&path) {
                    Some(source) => source,
                    None => continue, // reported as TargetFileNotFound below
                };
                debug!("absorbing bundled {}", path);
                let mut file = parse_file(Path::new(&path), source)
                    .map_err(|error| Error::Parse(vec![error]))?;
                file.rel_path = PathBuf::from(&path);
                self.files.push(file);
            }
        }

        let index = self.index();
        for file_id in 0..self.files.len() {
            let importer = self.files[file_id].path.clone();
            for import in &mut self.files[file_id].imports {
                match index.get(&import.path) {
                    Some(&target) => import.target = Some(target),
                    None => {
                        return Err(ResolveError::TargetFileNotFound {
                            importer,
                            import: import.path.clone(),
                        }
                        .into())
                    }
                }
            }
        }

        // Transitive public re-export, to a fixed point so chains of public
        // imports propagate. Synthetic imports are deduplicated by target.
        loop {
            let mut additions: Vec<(FileId, Import)> = Vec::new();
            for (file_id, file) in self.files.iter().enumerate() {
                let known: HashSet<FileId> =
                    file.imports.iter().filter_map(|import| import.target).collect();
                for import in &file.imports {
                    let target = import.target.expect("imports linked above");
                    for re_export in &self.files[target].imports {
                        if re_export.kind != ImportKind::Public {
                            continue;
                        }
                        let re_target = re_export.target.expect("imports linked above");
                        if !known.contains(&re_target)
                            && !additions
                                .iter()
                                .any(|(id, add)| *id == file_id && add.target == Some(re_target))
                        {
                            additions.push((
                                file_id,
                                Import {
                                    path: re_export.path.clone(),
                                    kind: ImportKind::Public,
                                    target: Some(re_target),
                                },
                            ));
                        }
                    }
                }
            }
            if additions.is_empty() {
                break;
            }
            for (file_id, import) in additions {
                self.files[file_id].imports.push(import);
            }
        }
        Ok(())
    }

    /// Pass B: parent naming, extend application, then reference resolution.
    fn resolve_types(&mut self) -> Result<(), Error> {
        for file in &mut self.files {
            let package = file.package.clone().unwrap_or_default();
            for message in &mut file.messages {
                assign_fq_names(message, &package);
            }
            for decl in &mut file.enums {
                decl.fq_name = join_scope(&package, &decl.name);
            }
        }

        let indexes: Vec<HashMap<String, TypeKind>> =
            self.files.iter().map(build_type_index).collect();
        // Extends add fields, never types, so the indexes stay valid across
        // this call.
        self.apply_extends(&indexes)?;

        let contexts: Vec<ResolveContext> = self
            .files
            .iter()
            .map(|file| ResolveContext {
                package: file.package.clone().unwrap_or_default(),
                imports: file.imports.iter().filter_map(|import| import.target).collect(),
            })
            .collect();

        for file_id in 0..self.files.len() {
            let mut file = std::mem::take(&mut self.files[file_id]);
            let result = resolve_file(file_id, &mut file, &contexts, &indexes);
            self.files[file_id] = file;
            result?;
        }
        Ok(())
    }

    /// Copies the fields of every `extend` block onto the targeted base
    /// message, then drops the blocks.
    fn apply_extends(
        &mut self,
        indexes: &[HashMap<String, TypeKind>],
    ) -> Result<(), Error> {
        struct Job {
            source: FileId,
            extend: Extend,
        }

        let mut jobs = Vec::new();
        for (file_id, file) in self.files.iter_mut().enumerate() {
            for extend in file.extends.drain(..) {
                jobs.push(Job {
                    source: file_id,
                    extend,
                });
            }
            for message in &mut file.messages {
                drain_extends(message, file_id, &mut |source, extend| {
                    jobs.push(Job { source, extend })
                });
            }
        }

        // Bases found through imports may be extended only once; this
        // mirrors the behavior schemas in the wild rely on. Local bases are
        // not restricted.
        let mut extended: HashSet<(FileId, String)> = HashSet::new();

        for job in jobs {
            let source_file = &self.files[job.source];
            let package = source_file.package.clone().unwrap_or_default();
            let base = &job.extend.base;

            // (a) Walk outward from the extending scope within the source
            // file.
            let mut target: Option<(FileId, String)> = None;
            if base.absolute {
                if indexes[job.source].get(&base.name) == Some(&TypeKind::Message) {
                    target = Some((job.source, base.name.clone()));
                }
            } else {
                let full_scope = join_scope(&package, &job.extend.scope);
                for prefix in scope_chain(&full_scope) {
                    let candidate = join_scope(prefix, &base.name);
                    if indexes[job.source].get(&candidate) == Some(&TypeKind::Message) {
                        target = Some((job.source, candidate));
                        break;
                    }
                }
            }

            // (b) Fall back to the top-level messages of each import.
            if target.is_none() {
                let imports: Vec<FileId> = source_file
                    .imports
                    .iter()
                    .filter_map(|import| import.target)
                    .collect();
                'imports: for import_id in imports {
                    for message in &self.files[import_id].messages {
                        let matches = message.fq_name == base.name
                            || (!base.absolute && message.name == base.name);
                        if matches && !extended.contains(&(import_id, message.fq_name.clone())) {
                            target = Some((import_id, message.fq_name.clone()));
                            break 'imports;
                        }
                    }
                }
            }

            let (target_file, target_fq) = target.ok_or_else(|| ResolveError::ExtendSourceNotFound {
                file: self.files[job.source].path.clone(),
                base: base.name.clone(),
            })?;
            extended.insert((target_file, target_fq.clone()));
            debug!(
                "extend: {} gains {} field(s) from {}",
                target_fq,
                job.extend.fields.len(),
                self.files[job.source].path.display()
            );

            let source = job.source;
            let message = self.files[target_file]
                .message_mut(&target_fq)
                .expect("indexed message exists");
            for field in job.extend.fields {
                if message.has_field_named(&field.name) {
                    continue;
                }
                let mut copy = field;
                if let FieldType::Named(named) = &mut copy.typ {
                    // Type names in the copy keep resolving in the scope
                    // they were written in.
                    named.scope_file = Some(source);
                }
                message.fields.push(MessageField::Normal(copy));
            }
        }
        Ok(())
    }
}

impl ProtoFile {
    /// Finds a message by fully-qualified name anywhere in the nesting tree.
    pub fn message(&self, fq_name: &str) -> Option<&Message> {
        fn walk<'m>(messages: &'m [Message], fq_name: &str) -> Option<&'m Message> {
            for message in messages {
                if message.fq_name == fq_name {
                    return Some(message);
                }
                if let Some(found) = walk(&message.messages, fq_name) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.messages, fq_name)
    }

    /// Finds an enum by fully-qualified name, at top level or nested.
    pub fn enum_by_fq(&self, fq_name: &str) -> Option<&crate::ast::Enum> {
        fn walk<'m>(
            messages: &'m [Message],
            fq_name: &str,
        ) -> Option<&'m crate::ast::Enum> {
            for message in messages {
                if let Some(found) = message.enums.iter().find(|decl| decl.fq_name == fq_name) {
                    return Some(found);
                }
                if let Some(found) = walk(&message.messages, fq_name) {
                    return Some(found);
                }
            }
            None
        }
        self.enums
            .iter()
            .find(|decl| decl.fq_name == fq_name)
            .or_else(|| walk(&self.messages, fq_name))
    }

    fn message_mut(&mut self, fq_name: &str) -> Option<&mut Message> {
        fn walk<'m>(messages: &'m mut [Message], fq_name: &str) -> Option<&'m mut Message> {
            for message in messages {
                if message.fq_name == fq_name {
                    return Some(message);
                }
                if let Some(found) = walk(&mut message.messages, fq_name) {
                    return Some(found);
                }
            }
            None
        }
        walk(&mut self.messages, fq_name)
    }
}

struct ResolveContext {
    package: String,
    /// Import targets in declaration order, synthetic public re-exports
    /// included.
    imports: Vec<FileId>,
}

fn join_scope(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        scope.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

/// Yields `scope`, then each enclosing scope, then the root (empty string).
fn scope_chain(scope: &str) -> impl Iterator<Item = &str> {
    let mut remaining = Some(scope);
    std::iter::from_fn(move || {
        let current = remaining?;
        remaining = if current.is_empty() {
            None
        } else {
            Some(current.rfind('.').map(|dot| &current[..dot]).unwrap_or(""))
        };
        Some(current)
    })
}

fn assign_fq_names(message: &mut Message, scope: &str) {
    message.fq_name = join_scope(scope, &message.name);
    let inner = message.fq_name.clone();
    for nested in &mut message.messages {
        assign_fq_names(nested, &inner);
    }
    for decl in &mut message.enums {
        decl.fq_name = join_scope(&inner, &decl.name);
    }
}

fn build_type_index(file: &ProtoFile) -> HashMap<String, TypeKind> {
    fn walk(message: &Message, index: &mut HashMap<String, TypeKind>) {
        index.insert(message.fq_name.clone(), TypeKind::Message);
        for decl in &message.enums {
            index.insert(decl.fq_name.clone(), TypeKind::Enum);
        }
        for nested in &message.messages {
            walk(nested, index);
        }
    }

    let mut index = HashMap::new();
    for message in &file.messages {
        walk(message, &mut index);
    }
    for decl in &file.enums {
        index.insert(decl.fq_name.clone(), TypeKind::Enum);
    }
    index
}

fn drain_extends(
    message: &mut Message,
    file_id: FileId,
    sink: &mut impl FnMut(FileId, Extend),
) {
    for extend in message.extends.drain(..) {
        sink(file_id, extend);
    }
    for nested in &mut message.messages {
        drain_extends(nested, file_id, sink);
    }
}

/// Resolves every named field type in one file.
fn resolve_file(
    file_id: FileId,
    file: &mut ProtoFile,
    contexts: &[ResolveContext],
    indexes: &[HashMap<String, TypeKind>],
) -> Result<(), ResolveError> {
    let path = file.path.clone();
    let mut resolve = |named: &mut NamedType| -> Result<(), ResolveError> {
        let governing = named.scope_file.unwrap_or(file_id);
        let context = &contexts[governing];

        let hit = lookup_named(named, governing, context, indexes);
        match hit {
            Some((defining, fq_name, kind)) => {
                named.resolved = Some(TypeRef {
                    kind,
                    file: defining,
                    fq_name,
                });
                Ok(())
            }
            None => Err(ResolveError::TypeNotFound {
                file: path.clone(),
                name: named.name.name.clone(),
                scope: join_scope(&context.package, &named.scope),
            }),
        }
    };

    fn walk_message(
        message: &mut Message,
        resolve: &mut impl FnMut(&mut NamedType) -> Result<(), ResolveError>,
    ) -> Result<(), ResolveError> {
        for field in &mut message.fields {
            match field {
                MessageField::Normal(field) => {
                    if let FieldType::Named(named) = &mut field.typ {
                        resolve(named)?;
                    }
                }
                MessageField::Map(map) => {
                    if let FieldType::Named(named) = &mut map.value_type {
                        resolve(named)?;
                    }
                }
                MessageField::OneOf(oneof) => {
                    for field in &mut oneof.fields {
                        if let FieldType::Named(named) = &mut field.typ {
                            resolve(named)?;
                        }
                    }
                }
            }
        }
        for nested in &mut message.messages {
            walk_message(nested, resolve)?;
        }
        Ok(())
    }

    for message in &mut file.messages {
        walk_message(message, &mut resolve)?;
    }
    Ok(())
}

/// The scoped-name lookup: local scope walk first, then each import in
/// order. Absolute names skip the walk.
fn lookup_named(
    named: &NamedType,
    governing: FileId,
    context: &ResolveContext,
    indexes: &[HashMap<String, TypeKind>],
) -> Option<(FileId, String, TypeKind)> {
    let try_file = |id: FileId| -> Option<(FileId, String, TypeKind)> {
        let index = &indexes[id];
        if named.name.absolute {
            return index
                .get(&named.name.name)
                .map(|&kind| (id, named.name.name.clone(), kind));
        }
        let full_scope = join_scope(&context.package, &named.scope);
        for prefix in scope_chain(&full_scope) {
            let candidate = join_scope(prefix, &named.name.name);
            if let Some(&kind) = index.get(&candidate) {
                return Some((id, candidate, kind));
            }
        }
        None
    };

    if let Some(hit) = try_file(governing) {
        return Some(hit);
    }
    for &import in &context.imports {
        if let Some(hit) = try_file(import) {
            return Some(hit);
        }
    }
    None
}
