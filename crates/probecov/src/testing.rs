//! Builders for method bodies and class files used by unit tests.

#![allow(clippy::unwrap_used)]

use crate::classfile::access::{ABSTRACT, INTERFACE, MODULE, PUBLIC, STATIC, SUPER, SYNTHETIC};
use crate::classfile::code::{Code, Insn, LabelId, Node};
use crate::classfile::constant_pool::ConstantPool;
use crate::classfile::descriptor::MethodDescriptor;
use crate::classfile::frames::{Frame, VType};
use crate::classfile::opcodes::{
    self, ALOAD, DLOAD, DSTORE, GOTO, ICONST_1, IFEQ, IFNE, ILOAD, INVOKESPECIAL, INVOKESTATIC,
    IRETURN, ISTORE, LLOAD, LSTORE, NEW, RETURN,
};
use crate::classfile::{Attribute, ClassFile, MemberInfo};
use std::collections::HashSet;

/// Appends nodes to a [`Code`], allocating pool constants on the way
#[derive(Debug)]
pub struct CodeBuilder {
    code: Code,
    pool: ConstantPool,
    max_locals: u16,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::with_pool(ConstantPool::new())
    }

    pub fn with_pool(pool: ConstantPool) -> Self {
        Self {
            code: Code::empty(4, 0),
            pool,
            max_locals: 0,
        }
    }

    /// Allocate a label and place it here
    pub fn label(&mut self) -> LabelId {
        let label = self.code.new_label();
        self.code.nodes.push(Node::Label(label));
        label
    }

    /// Allocate a label to be placed later
    pub fn new_label(&mut self) -> LabelId {
        self.code.new_label()
    }

    pub fn place(&mut self, label: LabelId) -> &mut Self {
        self.code.nodes.push(Node::Label(label));
        self
    }

    pub fn line(&mut self, line: u16) -> &mut Self {
        self.code.nodes.push(Node::Line(line));
        self
    }

    pub fn frame(&mut self, locals: Vec<VType>, stack: Vec<VType>) -> &mut Self {
        self.code.nodes.push(Node::Frame(Frame { locals, stack }));
        self
    }

    pub fn simple(&mut self, opcode: u8) -> &mut Self {
        self.insn(Insn::Simple(opcode))
    }

    pub fn var(&mut self, opcode: u8, var: u16) -> &mut Self {
        let width = if matches!(opcode, LLOAD | LSTORE | DLOAD | DSTORE) {
            2
        } else {
            1
        };
        self.max_locals = self.max_locals.max(var + width);
        self.insn(Insn::Var { opcode, var })
    }

    pub fn iinc(&mut self, var: u16, incr: i16) -> &mut Self {
        self.max_locals = self.max_locals.max(var + 1);
        self.insn(Insn::Iinc { var, incr })
    }

    pub fn jump(&mut self, opcode: u8, target: LabelId) -> &mut Self {
        self.insn(Insn::Jump { opcode, target })
    }

    pub fn invoke_static(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let index = self.pool.add_method_ref(owner, name, descriptor, false).unwrap();
        self.insn(Insn::Method {
            opcode: INVOKESTATIC,
            index,
        })
    }

    pub fn invoke_special(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let index = self.pool.add_method_ref(owner, name, descriptor, false).unwrap();
        self.insn(Insn::Method {
            opcode: INVOKESPECIAL,
            index,
        })
    }

    pub fn new_object(&mut self, class: &str) -> &mut Self {
        let index = self.pool.add_class(class).unwrap();
        self.insn(Insn::Type { opcode: NEW, index })
    }

    pub fn table_switch(&mut self, default: LabelId, low: i32, targets: Vec<LabelId>) -> &mut Self {
        self.insn(Insn::TableSwitch {
            default,
            low,
            targets,
        })
    }

    pub fn lookup_switch(&mut self, default: LabelId, pairs: Vec<(i32, LabelId)>) -> &mut Self {
        self.insn(Insn::LookupSwitch { default, pairs })
    }

    pub fn max_stack(&mut self, max_stack: u16) -> &mut Self {
        self.code.max_stack = max_stack;
        self
    }

    fn insn(&mut self, insn: Insn) -> &mut Self {
        self.code.nodes.push(Node::Insn(insn));
        self
    }

    pub fn build(self) -> Code {
        self.build_with_pool().0
    }

    pub fn build_with_pool(self) -> (Code, ConstantPool) {
        let mut code = self.code;
        code.max_locals = code.max_locals.max(self.max_locals);
        (code, self.pool)
    }
}

/// Assembles a class file extending `java/lang/Object`
#[derive(Debug)]
pub struct ClassFixture {
    name: String,
    major: u16,
    access: u16,
    pool: ConstantPool,
    methods: Vec<MemberInfo>,
    attributes: Vec<Attribute>,
    has_super: bool,
}

impl ClassFixture {
    pub fn new(name: &str, major: u16) -> Self {
        Self {
            name: name.to_string(),
            major,
            access: PUBLIC | SUPER,
            pool: ConstantPool::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            has_super: true,
        }
    }

    pub fn interface(mut self) -> Self {
        self.access = PUBLIC | INTERFACE | ABSTRACT;
        self
    }

    pub fn synthetic(mut self) -> Self {
        self.access |= SYNTHETIC;
        self
    }

    pub fn module(mut self) -> Self {
        self.access = MODULE;
        self.has_super = false;
        self
    }

    pub fn source_file(mut self, file: &str) -> Self {
        let name_index = self.pool.add_utf8("SourceFile").unwrap();
        let value = self.pool.add_utf8(file).unwrap();
        self.attributes.push(Attribute {
            name_index,
            info: value.to_be_bytes().to_vec(),
        });
        self
    }

    /// Add a method whose body is produced by `body`
    pub fn method(
        mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        body: impl FnOnce(&mut CodeBuilder),
    ) -> Self {
        let pool = std::mem::replace(&mut self.pool, ConstantPool::new());
        let mut builder = CodeBuilder::with_pool(pool);
        body(&mut builder);
        let (mut code, mut pool) = builder.build_with_pool();

        let parsed = MethodDescriptor::parse(descriptor).unwrap();
        let receiver = u16::from(access & STATIC == 0);
        code.max_locals = code.max_locals.max(parsed.param_slots() + receiver);
        let initial = Frame::initial(&self.name, access, name, &parsed);
        let info = code.write(&mut pool, &initial, self.major >= 50).unwrap();

        let code_name = pool.add_utf8("Code").unwrap();
        let member = MemberInfo {
            access,
            name_index: pool.add_utf8(name).unwrap(),
            descriptor_index: pool.add_utf8(descriptor).unwrap(),
            attributes: vec![Attribute {
                name_index: code_name,
                info,
            }],
        };
        self.pool = pool;
        self.methods.push(member);
        self
    }

    pub fn abstract_method(mut self, name: &str, descriptor: &str) -> Self {
        let member = MemberInfo {
            access: PUBLIC | ABSTRACT,
            name_index: self.pool.add_utf8(name).unwrap(),
            descriptor_index: self.pool.add_utf8(descriptor).unwrap(),
            attributes: Vec::new(),
        };
        self.methods.push(member);
        self
    }

    /// Add `<init>` calling the `Object` constructor on `line`
    pub fn default_constructor(self, line: u16) -> Self {
        self.method(PUBLIC, "<init>", "()V", |b| {
            b.label();
            b.line(line)
                .var(ALOAD, 0)
                .invoke_special("java/lang/Object", "<init>", "()V")
                .simple(RETURN);
        })
    }

    pub fn build(mut self) -> Vec<u8> {
        let this_class = self.pool.add_class(&self.name).unwrap();
        let super_class = if self.has_super {
            self.pool.add_class("java/lang/Object").unwrap()
        } else {
            0
        };
        ClassFile {
            minor_version: 0,
            major_version: self.major,
            pool: self.pool,
            access: self.access,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: self.methods,
            attributes: self.attributes,
        }
        .to_bytes()
        .unwrap()
    }

    /// `a/Example` from `Example.java`:
    ///
    /// ```text
    /// 1  public Example() {}
    /// 3  static int f(int x) {
    /// 3      if (x == 0)
    /// 4          x = 1;
    /// 5      return x;
    ///    }
    /// ```
    ///
    /// Probes: 0 constructor exit, 1 taken jump, 2 fallthrough into the
    /// join, 3 method exit.
    pub fn if_without_else(major: u16) -> Vec<u8> {
        Self::named_if_without_else("a/Example", major)
    }

    /// [`Self::if_without_else`] under another class name
    pub fn named_if_without_else(name: &str, major: u16) -> Vec<u8> {
        Self::new(name, major)
            .source_file("Example.java")
            .default_constructor(1)
            .method(PUBLIC | STATIC, "f", "(I)I", |b| {
                let join = b.new_label();
                b.label();
                b.line(3).var(ILOAD, 0).jump(IFNE, join);
                b.line(4).simple(ICONST_1).var(ISTORE, 0);
                b.place(join)
                    .line(5)
                    .frame(vec![VType::Integer], Vec::new())
                    .var(ILOAD, 0)
                    .simple(IRETURN);
            })
            .build()
    }
}

impl ClassFixture {
    /// `a/Either`, a short-circuit condition as javac lays it out:
    ///
    /// ```text
    /// 2  static void g(int a, int b) {
    /// 2      if (a != 0 || b != 0)
    /// 3          a++;
    /// 4  }
    /// ```
    ///
    /// The `a++` label is reached by the first jump and by falling out of
    /// the second one, which itself jumps to the multi-target return label.
    pub fn short_circuit(major: u16) -> Vec<u8> {
        Self::new("a/Either", major)
            .source_file("Either.java")
            .method(STATIC, "g", "(II)V", short_circuit_body)
            .build()
    }
}

/// Body of [`ClassFixture::short_circuit`]
pub fn short_circuit_body(b: &mut CodeBuilder) {
    let then = b.new_label();
    let end = b.new_label();
    b.label();
    b.line(2)
        .var(ILOAD, 0)
        .jump(IFNE, then)
        .var(ILOAD, 1)
        .jump(IFEQ, end);
    b.place(then)
        .line(3)
        .frame(vec![VType::Integer, VType::Integer], Vec::new())
        .iinc(0, 1);
    b.place(end)
        .line(4)
        .frame(vec![VType::Integer, VType::Integer], Vec::new())
        .simple(RETURN);
}

/// Decoded bodies of every method with code, by name
pub fn method_bodies(bytes: &[u8]) -> Vec<(String, Code)> {
    let class = ClassFile::parse(bytes).unwrap();
    let class_name = class.name().unwrap();
    class
        .methods
        .iter()
        .filter_map(|member| {
            let attribute = class.attribute(&member.attributes, "Code")?;
            let name = class.member_name(member).unwrap();
            let descriptor =
                MethodDescriptor::parse(&class.member_descriptor(member).unwrap()).unwrap();
            let initial = Frame::initial(&class_name, member.access, &name, &descriptor);
            Some((name, Code::parse(&attribute.info, &class.pool, &initial).unwrap()))
        })
        .collect()
}

/// Branch and handler targets that directly follow an unconditional
/// transfer but have no stack map frame
pub fn unframed_targets(code: &Code) -> Vec<LabelId> {
    let mut targets: HashSet<LabelId> = code.handlers.iter().map(|h| h.handler).collect();
    for insn in code.instructions() {
        if let Insn::Jump { target, .. } = insn {
            let _ = targets.insert(*target);
        } else if let Some((default, cases)) = insn.switch_targets() {
            let _ = targets.insert(default);
            targets.extend(cases);
        }
    }

    let mut missing = Vec::new();
    let mut after_transfer = false;
    for (index, node) in code.nodes.iter().enumerate() {
        match node {
            Node::Insn(insn) => {
                after_transfer = match insn {
                    Insn::Jump { opcode, .. } => *opcode == GOTO,
                    Insn::Simple(opcode) => opcodes::is_exit(*opcode),
                    other => other.switch_targets().is_some(),
                };
            }
            Node::Label(label) if after_transfer && targets.contains(label) => {
                let framed = code.nodes[index + 1..]
                    .iter()
                    .take_while(|n| !matches!(n, Node::Insn(_)))
                    .any(|n| matches!(n, Node::Frame(_)));
                if !framed {
                    missing.push(*label);
                }
            }
            _ => {}
        }
    }
    missing
}
