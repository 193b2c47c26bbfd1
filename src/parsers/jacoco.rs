/// Parser for JaCoCo XML coverage reports.
///
/// JaCoCo XML structure:
///   <report name="...">
///     <sessioninfo id="..." start="..." dump="..."/>
///     <package name="com/example">
///       <class name="com/example/Foo" sourcefilename="Foo.java">
///         <method name="doStuff" desc="()V" line="10">
///           <counter type="INSTRUCTION" missed="0" covered="5"/>
///           <counter type="BRANCH" missed="1" covered="3"/>
///           <counter type="LINE" missed="0" covered="3"/>
///           <counter type="COMPLEXITY" missed="1" covered="2"/>
///           <counter type="METHOD" missed="0" covered="1"/>
///         </method>
///         <counter type="INSTRUCTION" missed="2" covered="10"/>
///         <counter type="LINE" missed="1" covered="5"/>
///         ...
///       </class>
///       <sourcefile name="Foo.java">
///         <line nr="10" mi="0" ci="3" mb="0" cb="2"/>
///         <line nr="11" mi="2" ci="5" mb="1" cb="1"/>
///         ...
///       </sourcefile>
///       <counter type="INSTRUCTION" missed="2" covered="10"/>
///     </package>
///     <counter type="INSTRUCTION" missed="2" covered="10"/>
///     ...
///   </report>
///
/// Notes:
///   - Line-level data lives inside `<sourcefile>` elements, not `<class>`.
///     Classes are joined to their source file by `sourcefilename` within the
///     same package; a class without a matching source file is skipped.
///   - Counters are attributed to their direct parent only. Class and report
///     totals are read from their own counters, never summed from children.
///   - Multi-module reports nest packages inside `<group>` elements.
use std::collections::{BTreeSet, HashMap};
use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};

use super::{get_attr, get_num_attr, ReportParser};
use crate::error::{CovboostError, Result};
use crate::model::*;

/// JaCoCo XML format parser.
pub struct JacocoParser;

impl ReportParser for JacocoParser {
    fn format(&self) -> &'static str {
        "jacoco"
    }

    fn can_parse(&self, content: &[u8]) -> bool {
        let head = super::sniff_head(content);
        // XML with a <report element and either the DTD reference or
        // JaCoCo-specific child elements.
        super::looks_like_xml(&head)
            && head.contains("<report")
            && (head.contains("jacoco")
                || head.contains("JACOCO")
                || head.contains("<package")
                || head.contains("<sessioninfo"))
    }

    fn parse(&self, input: &[u8]) -> Result<CoverageSnapshot> {
        parse(input)
    }
}

/// Parse JaCoCo XML coverage data from raw bytes.
pub fn parse(input: &[u8]) -> Result<CoverageSnapshot> {
    parse_reader(input)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Report,
    Group,
    Package,
    Class,
    Method,
    SourceFile,
    Other,
}

#[derive(Default)]
struct PackageScope {
    name: String,
    classes: Vec<ClassCoverage>,
    source_lines: HashMap<String, BTreeSet<u32>>,
}

#[derive(Default)]
struct SnapshotBuilder {
    seen_root: bool,
    snapshot: CoverageSnapshot,
    package: Option<PackageScope>,
    class: Option<ClassCoverage>,
    method: Option<MethodCoverage>,
    sourcefile: Option<(String, BTreeSet<u32>)>,
}

fn parse_reader<R: BufRead>(reader: R) -> Result<CoverageSnapshot> {
    let mut xml = super::xml_reader(reader);
    let mut buf = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut builder = SnapshotBuilder::default();

    loop {
        let event = xml.read_event_into(&mut buf);
        match event {
            Err(e) => return Err(super::xml_err(e, &xml)),
            Ok(Event::Eof) => break,
            Ok(Event::Start(ref e)) => {
                let frame = builder.open(e, stack.last().copied())?;
                stack.push(frame);
            }
            Ok(Event::Empty(ref e)) => {
                let frame = builder.open(e, stack.last().copied())?;
                builder.close(frame)?;
            }
            Ok(Event::End(_)) => {
                if let Some(frame) = stack.pop() {
                    builder.close(frame)?;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(CovboostError::MalformedReport(
            "document ended before all elements were closed".to_string(),
        ));
    }
    builder.finish()
}

impl SnapshotBuilder {
    fn open(&mut self, e: &BytesStart<'_>, parent: Option<Frame>) -> Result<Frame> {
        let name = e.name();
        let frame = match (name.as_ref(), parent) {
            (b"report", None) => {
                self.seen_root = true;
                Frame::Report
            }
            (other, None) => {
                return Err(CovboostError::MalformedReport(format!(
                    "root element is <{}>, expected <report>",
                    String::from_utf8_lossy(other)
                )));
            }
            (b"group", Some(Frame::Report | Frame::Group)) => Frame::Group,
            (b"package", Some(Frame::Report | Frame::Group)) => {
                self.package = Some(PackageScope {
                    name: get_attr(e, b"name").unwrap_or_default(),
                    ..Default::default()
                });
                Frame::Package
            }
            (b"class", Some(Frame::Package)) => {
                let class_name = get_attr(e, b"name").unwrap_or_default();
                let source_file = get_attr(e, b"sourcefilename").unwrap_or_default();
                self.class = Some(ClassCoverage::new(class_name, source_file));
                Frame::Class
            }
            (b"method", Some(Frame::Class)) => {
                let mut method = MethodCoverage::new(
                    get_attr(e, b"name").unwrap_or_default(),
                    get_num_attr(e, b"line")?,
                );
                method.descriptor = get_attr(e, b"desc");
                self.method = Some(method);
                Frame::Method
            }
            (b"sourcefile", Some(Frame::Package)) => {
                let file_name = get_attr(e, b"name").unwrap_or_default();
                self.sourcefile = Some((file_name, BTreeSet::new()));
                Frame::SourceFile
            }
            (b"line", Some(Frame::SourceFile)) => {
                let nr: u32 = get_num_attr(e, b"nr")?;
                let mi: u64 = get_num_attr(e, b"mi")?;
                if mi > 0 {
                    if let Some((_, lines)) = self.sourcefile.as_mut() {
                        lines.insert(nr);
                    }
                }
                Frame::Other
            }
            (b"counter", Some(parent)) => {
                self.counter(e, parent)?;
                Frame::Other
            }
            _ => Frame::Other,
        };
        Ok(frame)
    }

    fn counter(&mut self, e: &BytesStart<'_>, parent: Frame) -> Result<()> {
        let Some(kind) = get_attr(e, b"type").and_then(|t| CounterKind::from_attr(&t)) else {
            return Ok(());
        };
        let counter = CoverageCounter::new(get_num_attr(e, b"missed")?, get_num_attr(e, b"covered")?);

        match parent {
            Frame::Report => {
                self.snapshot.summary.counters.insert(kind, counter);
            }
            Frame::Class => {
                if let Some(class) = self.class.as_mut() {
                    match kind {
                        CounterKind::Instruction => class.instruction = counter,
                        CounterKind::Branch => class.branch = Some(counter),
                        CounterKind::Line => class.lines = counter,
                        _ => {}
                    }
                }
            }
            Frame::Method => {
                if let Some(method) = self.method.as_mut() {
                    match kind {
                        CounterKind::Instruction => method.instruction = counter,
                        CounterKind::Branch => method.branch = Some(counter),
                        CounterKind::Line => method.lines = counter,
                        CounterKind::Complexity => method.complexity = counter,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Method => {
                if let (Some(method), Some(class)) = (self.method.take(), self.class.as_mut()) {
                    class.methods.push(method);
                }
            }
            Frame::Class => {
                if let (Some(class), Some(pkg)) = (self.class.take(), self.package.as_mut()) {
                    pkg.classes.push(class);
                }
            }
            Frame::SourceFile => {
                if let (Some((name, lines)), Some(pkg)) =
                    (self.sourcefile.take(), self.package.as_mut())
                {
                    pkg.source_lines.insert(name, lines);
                }
            }
            Frame::Package => {
                if let Some(pkg) = self.package.take() {
                    self.finish_package(pkg)?;
                }
            }
            Frame::Report | Frame::Group | Frame::Other => {}
        }
        Ok(())
    }

    fn finish_package(&mut self, pkg: PackageScope) -> Result<()> {
        if pkg.classes.is_empty() {
            return Err(CovboostError::MalformedReport(format!(
                "package '{}' has no class entries",
                pkg.name
            )));
        }
        for mut class in pkg.classes {
            match pkg.source_lines.get(&class.source_file) {
                Some(lines) => {
                    class.uncovered_lines = lines.clone();
                    debug!(
                        class = %class.name,
                        methods = class.methods.len(),
                        uncovered = class.uncovered_lines.len(),
                        "parsed class"
                    );
                    self.snapshot.classes.push(class);
                }
                None => {
                    warn!(
                        class = %class.name,
                        source_file = %class.source_file,
                        "no matching <sourcefile> in package; skipping class"
                    );
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<CoverageSnapshot> {
        if !self.seen_root {
            return Err(CovboostError::MalformedReport(
                "missing <report> element".to_string(),
            ));
        }
        if self.snapshot.summary.is_empty() {
            return Err(CovboostError::MalformedReport(
                "report has no root-level counters".to_string(),
            ));
        }
        Ok(self.snapshot)
    }
}
