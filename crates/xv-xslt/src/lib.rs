//! XSLT 1.0 subset used to render XML documents into HTML fragments.
//!
//! A [`Stylesheet`] is compiled once into an owned instruction tree and can be
//! shared across threads; each [`Stylesheet::transform`] call parses the source
//! document, runs template rules from the root and returns the result tree as a
//! [`Fragment`].

mod compile;
mod eval;
mod lexer;
mod number;
mod pattern;
mod transform;
mod value;
mod xpath;

use compile::CompiledStylesheet;
use std::thread;
use std::time::Instant;
use xv_core::XvError;
use xv_core::XvResult;
use xv_dom::Fragment;

pub use compile::XSL_NAMESPACE;

/// Template recursion runs on its own stack so the depth limit is reached
/// before the caller's stack is exhausted.
const TRANSFORM_THREAD_STACK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Stylesheet {
    compiled: CompiledStylesheet,
}

impl Stylesheet {
    pub fn compile(source: &str) -> XvResult<Self> {
        let compiled = compile::compile_stylesheet(source)?;
        tracing::debug!(
            templates = compiled.templates.len(),
            rules = compiled.rules.len(),
            globals = compiled.globals.len(),
            "stylesheet compiled"
        );
        Ok(Self { compiled })
    }

    pub fn template_count(&self) -> usize {
        self.compiled.templates.len()
    }

    pub fn transform(&self, xml: &str) -> XvResult<Fragment> {
        self.transform_with_params(xml, &[])
    }

    /// Top-level `xsl:param` values are overridden by name with string values.
    pub fn transform_with_params(&self, xml: &str, params: &[(&str, &str)]) -> XvResult<Fragment> {
        let started = Instant::now();
        let nodes = thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name("xv-xslt".to_owned())
                .stack_size(TRANSFORM_THREAD_STACK_SIZE)
                .spawn_scoped(scope, || transform::run(&self.compiled, xml, params))
                .map_err(|error| {
                    XvError::new(
                        "xslt.worker.spawn_failed",
                        format!("failed to start transform worker: {error}"),
                    )
                })?;
            worker
                .join()
                .map_err(|_| XvError::new("xslt.worker.panicked", "transform worker panicked"))?
        })?;
        tracing::debug!(
            nodes = nodes.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "transform finished"
        );
        Ok(Fragment::from(nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::Stylesheet;

    fn compile(body: &str) -> Stylesheet {
        let source = format!(
            "<xsl:stylesheet version=\"1.0\" \
             xmlns:xsl=\"http://www.w3.org/1999/XSL/Transform\">{body}</xsl:stylesheet>"
        );
        match Stylesheet::compile(&source) {
            Ok(sheet) => sheet,
            Err(error) => panic!("{error}"),
        }
    }

    fn render(sheet: &Stylesheet, xml: &str) -> String {
        match sheet.transform(xml) {
            Ok(fragment) => fragment.to_html(),
            Err(error) => panic!("{error}"),
        }
    }

    const REPORT: &str = "<?xml version=\"1.0\"?>\
        <?xml-stylesheet type=\"text/xsl\" href=\"/ui/index.xsl\"?>\
        <report generated=\"1700000000000\">\
        <title>Nodes</title>\
        <node name=\"beta\" load=\"3\"/>\
        <node name=\"alpha\" load=\"12\"/>\
        <node name=\"gamma\" load=\"7\"/>\
        </report>";

    #[test]
    fn renders_table_with_sorting_and_avts() {
        let sheet = compile(
            "<xsl:template match=\"/report\">\
               <h2><xsl:value-of select=\"title\"/></h2>\
               <table>\
                 <xsl:for-each select=\"node\">\
                   <xsl:sort select=\"@load\" data-type=\"number\" order=\"descending\"/>\
                   <tr class=\"row-{position()}\"><td><xsl:value-of select=\"@name\"/></td></tr>\
                 </xsl:for-each>\
               </table>\
             </xsl:template>",
        );
        assert_eq!(
            render(&sheet, REPORT),
            "<h2>Nodes</h2><table>\
             <tr class=\"row-1\"><td>alpha</td></tr>\
             <tr class=\"row-2\"><td>gamma</td></tr>\
             <tr class=\"row-3\"><td>beta</td></tr>\
             </table>"
        );
    }

    #[test]
    fn builtin_rules_copy_text_through() {
        let sheet = compile("<xsl:template match=\"node\"/>");
        assert_eq!(render(&sheet, REPORT), "Nodes");
    }

    #[test]
    fn apply_templates_with_modes_params_and_priorities() {
        let sheet = compile(
            "<xsl:template match=\"/\">\
               <ul><xsl:apply-templates select=\"report/node\" mode=\"list\">\
                 <xsl:with-param name=\"suffix\" select=\"'!'\"/>\
               </xsl:apply-templates></ul>\
             </xsl:template>\
             <xsl:template match=\"node\" mode=\"list\">\
               <xsl:param name=\"suffix\"/>\
               <li><xsl:value-of select=\"concat(@name, $suffix)\"/></li>\
             </xsl:template>\
             <xsl:template match=\"node[@load &gt; 10]\" mode=\"list\">\
               <li class=\"hot\"><xsl:value-of select=\"@name\"/></li>\
             </xsl:template>",
        );
        assert_eq!(
            render(&sheet, REPORT),
            "<ul><li>beta!</li><li class=\"hot\">alpha</li><li>gamma!</li></ul>"
        );
    }

    #[test]
    fn variables_choose_and_named_templates() {
        let sheet = compile(
            "<xsl:variable name=\"total\" select=\"sum(/report/node/@load)\"/>\
             <xsl:variable name=\"label\" select=\"concat('total ', $total)\"/>\
             <xsl:template match=\"/\">\
               <xsl:call-template name=\"badge\"><xsl:with-param name=\"n\" select=\"$total\"/></xsl:call-template>\
               <p><xsl:value-of select=\"$label\"/></p>\
             </xsl:template>\
             <xsl:template name=\"badge\">\
               <xsl:param name=\"n\" select=\"0\"/>\
               <xsl:choose>\
                 <xsl:when test=\"$n &gt; 20\"><b>high</b></xsl:when>\
                 <xsl:otherwise><i>low</i></xsl:otherwise>\
               </xsl:choose>\
             </xsl:template>",
        );
        assert_eq!(render(&sheet, REPORT), "<b>high</b><p>total 22</p>");
    }

    #[test]
    fn element_attribute_and_copy_of() {
        let sheet = compile(
            "<xsl:template match=\"/\">\
               <xsl:element name=\"span\">\
                 <xsl:attribute name=\"id\">convert-timestamp</xsl:attribute>\
                 <xsl:attribute name=\"timestamp\"><xsl:value-of select=\"report/@generated\"/></xsl:attribute>\
               </xsl:element>\
               <xsl:copy-of select=\"report/title\"/>\
               <xsl:comment>end</xsl:comment>\
             </xsl:template>",
        );
        assert_eq!(
            render(&sheet, REPORT),
            "<span id=\"convert-timestamp\" timestamp=\"1700000000000\"></span>\
             <title>Nodes</title><!--end-->"
        );
    }

    #[test]
    fn external_params_override_globals() {
        let sheet = compile(
            "<xsl:param name=\"who\" select=\"'world'\"/>\
             <xsl:template match=\"/\">hello <xsl:value-of select=\"$who\"/></xsl:template>",
        );
        let fragment = match sheet.transform_with_params("<a/>", &[("who", "xslview")]) {
            Ok(fragment) => fragment,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(fragment.to_html(), "hello xslview");
        assert_eq!(render(&sheet, "<a/>"), "hello world");
    }

    #[test]
    fn runtime_failures_carry_codes() {
        let sheet = compile("<xsl:template match=\"/\"><xsl:value-of select=\"$missing\"/></xsl:template>");
        if let Err(error) = sheet.transform("<a/>") {
            assert_eq!(error.code, "xslt.eval.unbound_variable");
        } else {
            panic!("expected unbound variable");
        }

        if let Err(error) = sheet.transform("<a>") {
            assert_eq!(error.code, "xslt.source.invalid_xml");
        } else {
            panic!("expected invalid source");
        }

        let looping = compile(
            "<xsl:template match=\"/\"><xsl:call-template name=\"again\"/></xsl:template>\
             <xsl:template name=\"again\"><xsl:call-template name=\"again\"/></xsl:template>",
        );
        if let Err(error) = looping.transform("<a/>") {
            assert_eq!(error.code, "xslt.depth_exceeded");
        } else {
            panic!("expected depth limit");
        }

        let terminating = compile(
            "<xsl:template match=\"/\"><xsl:message terminate=\"yes\">stop</xsl:message></xsl:template>",
        );
        if let Err(error) = terminating.transform("<a/>") {
            assert_eq!(error.code, "xslt.message.terminated");
            assert_eq!(error.message, "stop");
        } else {
            panic!("expected termination");
        }
    }

    #[test]
    fn format_number_in_report_cells() {
        let sheet = compile(
            "<xsl:template match=\"/report\">\
               <xsl:for-each select=\"node\">\
                 <td><xsl:value-of select=\"format-number(@load * 1000.5, '#,##0.0')\"/></td>\
               </xsl:for-each>\
             </xsl:template>",
        );
        assert_eq!(
            render(&sheet, REPORT),
            "<td>3,001.5</td><td>12,006.0</td><td>7,003.5</td>"
        );

        let named = compile(
            "<xsl:template match=\"/\"><xsl:value-of select=\"format-number(1, '0', 'euro')\"/></xsl:template>",
        );
        if let Err(error) = named.transform("<a/>") {
            assert_eq!(error.code, "xslt.eval.decimal_format_unknown");
        } else {
            panic!("expected unknown decimal format");
        }
    }

    #[test]
    fn depth_limit_holds_on_small_caller_stacks() {
        let looping = compile(
            "<xsl:template match=\"*\"><xsl:apply-templates select=\".\" mode=\"deeper\"/></xsl:template>\
             <xsl:template match=\"*\" mode=\"deeper\"><xsl:apply-templates select=\".\" mode=\"deeper\"/></xsl:template>",
        );
        let caller = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(move || looping.transform("<a/>"));
        let result = match caller {
            Ok(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => panic!("transform panicked"),
            },
            Err(error) => panic!("{error}"),
        };
        if let Err(error) = result {
            assert_eq!(error.code, "xslt.depth_exceeded");
        } else {
            panic!("expected depth limit");
        }
    }

    #[test]
    fn namespace_constant_is_exported() {
        assert_eq!(super::XSL_NAMESPACE, "http://www.w3.org/1999/XSL/Transform");
    }

    #[test]
    fn stylesheets_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Stylesheet>();
    }
}
