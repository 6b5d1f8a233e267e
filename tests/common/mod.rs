#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Mutex;

use expense_pipeline::app::ports::{HttpClientPort, HttpGetResult};
use expense_pipeline::config::Config;
use expense_pipeline::error::Result;

pub const CATALOG_URL: &str = "http://files.test/demonstracoes_contabeis/";
pub const PERIOD_URL: &str = "http://files.test/demonstracoes_contabeis/2024/";
pub const REGISTRY_URL: &str = "http://files.test/operadoras_ativas/";
pub const REGISTRY_FILE: &str = "Relatorio_cadop.csv";

/// In-memory `HttpClientPort`: unknown URLs answer 404; every request is recorded.
#[derive(Default)]
pub struct FakeHttp {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.set(url, status, body);
        self
    }

    pub fn set(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.into()));
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }
}

#[async_trait]
impl HttpClientPort for FakeHttp {
    async fn get(&self, url: &str) -> Result<HttpGetResult> {
        self.calls.lock().unwrap().push(url.to_string());
        let (status, bytes) = self
            .routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or((404, Vec::new()));
        Ok(HttpGetResult { status, bytes })
    }
}

/// Apache-style index page listing `names`.
pub fn listing_html(names: &[&str]) -> String {
    let rows: String = names
        .iter()
        .map(|n| format!("<tr><td><a href=\"{n}\">{n}</a></td><td>2024-07-01 10:00</td><td>-</td></tr>\n"))
        .collect();
    format!(
        "<html><head><title>Index</title></head><body><table>\n\
         <tr><th>Name</th><th>Last modified</th><th>Size</th></tr>\n\
         <tr><td><a href=\"/\">Parent Directory</a></td><td></td><td>-</td></tr>\n\
         {rows}</table></body></html>"
    )
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let entries: Vec<(&str, &[u8])> = entries.iter().map(|(n, c)| (*n, c.as_bytes())).collect();
    zip_binary(&entries)
}

pub fn zip_binary(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

const XLSX_CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

const XLSX_ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const XLSX_WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Plan1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const XLSX_WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

// style 1 is the built-in short date format (id 14)
const XLSX_STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"></xf><xf numFmtId="14" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"></xf></cellXfs></styleSheet>"#;

/// Minimal single-sheet `.xlsx` whose worksheet `<sheetData>` is `sheet_rows`.
pub fn xlsx_bytes(sheet_rows: &str) -> Vec<u8> {
    let sheet = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{sheet_rows}</sheetData></worksheet>"#
    );
    zip_binary(&[
        ("[Content_Types].xml", XLSX_CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", XLSX_ROOT_RELS.as_bytes()),
        ("xl/workbook.xml", XLSX_WORKBOOK.as_bytes()),
        ("xl/_rels/workbook.xml.rels", XLSX_WORKBOOK_RELS.as_bytes()),
        ("xl/styles.xml", XLSX_STYLES.as_bytes()),
        ("xl/worksheets/sheet1.xml", sheet.as_bytes()),
    ])
}

/// Lowercase padded headers, a date-formatted serial (45292 = 2024-01-01), numeric class
/// codes, one expense row and one revenue row.
pub const EXPENSE_SHEET_ROWS: &str = r#"<row r="1"><c r="A1" t="inlineStr"><is><t> data</t></is></c><c r="B1" t="inlineStr"><is><t>reg_ans</t></is></c><c r="C1" t="inlineStr"><is><t>cd_conta_contabil</t></is></c><c r="D1" t="inlineStr"><is><t>descricao</t></is></c><c r="E1" t="inlineStr"><is><t>vl_saldo_final </t></is></c></row><row r="2"><c r="A2" s="1"><v>45292</v></c><c r="B2" t="inlineStr"><is><t>123456</t></is></c><c r="C2"><v>4100</v></c><c r="D2" t="inlineStr"><is><t>EVENTOS INDENIZAVEIS</t></is></c><c r="E2"><v>1500.5</v></c></row><row r="3"><c r="A3" s="1"><v>45292</v></c><c r="B3" t="inlineStr"><is><t>123456</t></is></c><c r="C3"><v>3111</v></c><c r="D3" t="inlineStr"><is><t>RECEITAS</t></is></c><c r="E3"><v>7000</v></c></row>"#;

pub const FIRST_QUARTER_CSV: &str = "DATA;REG_ANS;CD_CONTA_CONTABIL;DESCRICAO;VL_SALDO_FINAL\n\
2024-01-01;123456;311;RECEITAS;9.000,00\n\
2024-01-01;123456;4100;EVENTOS INDENIZAVEIS;1.500,00\n";

/// Supplementary first-quarter rows published as tab-separated text.
pub const FIRST_QUARTER_TXT: &str = "DATA\tREG_ANS\tCD_CONTA_CONTABIL\tDESCRICAO\tVL_SALDO_FINAL\n\
2024-01-01\t999999\t4100\tEVENTOS SEM CADASTRO\t10,00\n";

pub const SECOND_QUARTER_CSV: &str = "DATA;REG_ANS;CD_CONTA_CONTABIL;DESCRICAO;VL_SALDO_FINAL\n\
2024-04-01;123456;3111;RECEITAS;7.000,00\n\
2024-04-01;123456;4100;EVENTOS INDENIZAVEIS;1.500,00\n";

pub const REGISTRY_CSV: &str = "Registro_ANS;CNPJ;Razao_Social;Nome_Fantasia;UF\n\
123456;12345678000199;OPERADORA EXEMPLO S.A.;EXEMPLO;SP\n\
222222;98765432000100;OUTRA OPERADORA LTDA;OUTRA;RJ\n";

/// Catalog with one period holding two quarterly archives, plus the registry listing.
pub fn published_source() -> FakeHttp {
    FakeHttp::new()
        .route(CATALOG_URL, 200, listing_html(&["2023/", "2024/", "leiame.pdf"]))
        .route(PERIOD_URL, 200, listing_html(&["1T2024.zip", "2T2024.zip", "notas.pdf"]))
        .route(
            &format!("{PERIOD_URL}1T2024.zip"),
            200,
            zip_bytes(&[
                ("1T2024.csv", FIRST_QUARTER_CSV),
                ("1T2024_complemento.txt", FIRST_QUARTER_TXT),
            ]),
        )
        .route(
            &format!("{PERIOD_URL}2T2024.zip"),
            200,
            zip_bytes(&[("2T2024.csv", SECOND_QUARTER_CSV), ("leiame.txt.pdf", "ignored")]),
        )
        .route(REGISTRY_URL, 200, listing_html(&[REGISTRY_FILE]))
        .route(&format!("{REGISTRY_URL}{REGISTRY_FILE}"), 200, REGISTRY_CSV)
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.source.catalog_url = CATALOG_URL.to_string();
    config.source.registry_url = REGISTRY_URL.to_string();
    config.cache.dir = root.join("cache");
    config.store.database_path = root.join("expenses.db");
    config
}
